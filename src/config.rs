use std::path::{Path, PathBuf};

/// Where the ledger finds its database and its change definitions.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory of JSON change-record files.
    pub definitions_dir: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let base_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("schema-ledger");
        Self {
            db_path: base_dir.join("ledger.db"),
            definitions_dir: base_dir.join("changes"),
        }
    }
}

impl LedgerConfig {
    /// Create config with a custom database path.
    pub fn with_db_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.db_path = path.as_ref().to_path_buf();
        self
    }

    /// Create config with a custom definitions directory.
    pub fn with_definitions_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.definitions_dir = dir.as_ref().to_path_buf();
        self
    }

    /// The database URL for the SQLite executor.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }
}
