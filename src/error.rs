#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Unknown target change: {0}")]
    UnknownTarget(String),

    #[error("Operation conflict: {0}")]
    OperationConflict(String),

    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Target store unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Invalid change id: {0}")]
    InvalidChangeId(String),

    #[error("Duplicate change id: {0}")]
    DuplicateChangeId(String),

    #[error("Change definitions out of order: {0}")]
    UnorderedDefinitions(String),

    #[error("Ledger does not match change definitions: {0}")]
    LedgerDiverged(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid change definition: {0}")]
    InvalidDefinition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Change {change} failed at {operation}: {source}")]
    ChangeFailed {
        change: String,
        operation: String,
        #[source]
        source: Box<LedgerError>,
    },
}

// Convert SQLx errors to specific ledger errors. Pool-level failures mean the
// target store is unreachable; everything else is a query-level failure.
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                LedgerError::Database(format!("Database error: {}", db_err.message()))
            }
            sqlx::Error::PoolTimedOut => {
                LedgerError::ExecutorUnavailable("Database connection pool timeout".to_string())
            }
            sqlx::Error::PoolClosed => {
                LedgerError::ExecutorUnavailable("Database connection pool closed".to_string())
            }
            sqlx::Error::Io(e) => {
                LedgerError::ExecutorUnavailable(format!("Database IO error: {}", e))
            }
            sqlx::Error::RowNotFound => LedgerError::NotFound("Record not found".to_string()),
            sqlx::Error::ColumnDecode { .. } => {
                LedgerError::Database(format!("Column decode error: {}", err))
            }
            _ => LedgerError::Database(format!("Database error: {}", err)),
        }
    }
}

impl LedgerError {
    /// Wrap an executor failure with the change and operation that caused it.
    pub fn in_change(self, change: &crate::change::ChangeId, operation: String) -> Self {
        LedgerError::ChangeFailed {
            change: change.to_string(),
            operation,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
