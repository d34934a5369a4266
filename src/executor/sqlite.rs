//! SQLite executor.
//!
//! Renders each operation with sea-query's `SqliteQueryBuilder` and executes
//! it over an sqlx connection pool. The ledger itself lives in the same
//! database (`schema_ledger` table), so structural state and ledger state
//! cannot drift apart.
//!
//! SQLite quirks handled here:
//! - only one column can be added or dropped per ALTER TABLE statement;
//! - a column's type cannot be altered in place; `alter_field_type` rebuilds
//!   the table under a shadow name and swaps it in, inside one transaction;
//! - a foreign key cannot be added to an existing table; relations are
//!   tracked in the `schema_relation` table and backed by an index on the
//!   referencing field.

use crate::change::{ChangeId, LedgerEntry};
use crate::error::{LedgerError, Result};
use crate::executor::{Executor, LedgerStore};
use crate::operation::{DefaultValue, FieldSpec, FieldType, ReferentialAction};
use chrono::{DateTime, Utc};
use sea_query::{Alias, ColumnDef, Expr, Index, SqliteQueryBuilder, Table};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, warn};

/// Executor backed by a SQLite database.
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Connect to `database_url` and make sure the bookkeeping tables exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                LedgerError::ExecutorUnavailable(format!("Invalid database URL: {}", e))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::ExecutorUnavailable(format!("Failed to connect to database: {}", e))
            })?;

        let executor = Self { pool };
        executor.ensure_bookkeeping_tables().await?;
        Ok(executor)
    }

    /// The underlying connection pool, for callers that need to inspect the
    /// store directly.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_bookkeeping_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_ledger (
                change_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_relation (
                entity TEXT NOT NULL,
                name TEXT NOT NULL,
                field TEXT NOT NULL,
                referenced_entity TEXT NOT NULL,
                referenced_field TEXT NOT NULL,
                on_delete TEXT NOT NULL,
                PRIMARY KEY (entity, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn run_ddl(&self, sql: &str) -> Result<()> {
        debug!("executing: {}", sql);
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(classify_store_error)?;
        Ok(())
    }

    /// Column names of `entity`, or `DependencyMissing` when the table does
    /// not exist.
    async fn column_names(&self, entity: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?1)")
            .bind(entity)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(LedgerError::DependencyMissing(format!(
                "no such entity: {}",
                entity
            )));
        }
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(LedgerError::from))
            .collect()
    }

    async fn require_field(&self, entity: &str, field: &str) -> Result<()> {
        let columns = self.column_names(entity).await?;
        if !columns.iter().any(|c| c == field) {
            return Err(LedgerError::DependencyMissing(format!(
                "no such field: {}.{}",
                entity, field
            )));
        }
        Ok(())
    }
}

/// Map SQLite error text onto the ledger error taxonomy. The store's own
/// reporting is the source of truth for existence checks.
fn classify_store_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        let msg = db_err.message();
        if msg.contains("already exists")
            || msg.contains("duplicate column name")
            || msg.contains("UNIQUE constraint failed")
        {
            return LedgerError::OperationConflict(msg.to_string());
        }
        if msg.contains("no such table")
            || msg.contains("no such column")
            || msg.contains("no such index")
        {
            return LedgerError::DependencyMissing(msg.to_string());
        }
    }
    LedgerError::from(err)
}

fn column_def(field: &FieldSpec) -> ColumnDef {
    let mut col = ColumnDef::new(Alias::new(&field.name));
    match &field.field_type {
        FieldType::Text => match field.max_length {
            Some(len) => col.string_len(len),
            None => col.text(),
        },
        FieldType::Integer => col.integer(),
        FieldType::Decimal { precision, scale } => col.decimal_len(*precision, *scale),
        FieldType::Boolean => col.boolean(),
        FieldType::Date => col.date(),
        FieldType::DateTime => col.timestamp_with_time_zone(),
    };
    if field.nullable {
        col.null();
    } else {
        col.not_null();
    }
    if field.primary_key {
        col.primary_key();
    }
    if field.unique {
        col.unique_key();
    }
    if let Some(default) = &field.default {
        match default {
            DefaultValue::Text(v) => col.default(v.clone()),
            DefaultValue::Integer(v) => col.default(*v),
            DefaultValue::Decimal(v) => col.default(Expr::cust(v.clone())),
            DefaultValue::Boolean(v) => col.default(*v),
            DefaultValue::Now => col.default(Expr::current_timestamp()),
        };
    }
    col
}

/// Type name used when rebuilding a table by hand. SQLite only cares about
/// affinity, so these stay close to what sea-query renders.
fn sqlite_type_name(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Text => "text".to_string(),
        FieldType::Integer => "integer".to_string(),
        FieldType::Decimal { precision, scale } => format!("decimal({}, {})", precision, scale),
        FieldType::Boolean => "boolean".to_string(),
        FieldType::Date => "date".to_string(),
        FieldType::DateTime => "datetime".to_string(),
    }
}

fn relation_index_name(name: &str) -> String {
    format!("rel_{}", name)
}

#[async_trait::async_trait]
impl Executor for SqliteExecutor {
    async fn create_entity(&self, entity: &str, fields: &[FieldSpec]) -> Result<()> {
        let sql = {
            let mut stmt = Table::create();
            stmt.table(Alias::new(entity));
            for field in fields {
                stmt.col(column_def(field));
            }
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await
    }

    async fn drop_entity(&self, entity: &str) -> Result<()> {
        let sql = {
            let mut stmt = Table::drop();
            stmt.table(Alias::new(entity));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await?;

        // The entity's own relation bookkeeping goes with it.
        sqlx::query("DELETE FROM schema_relation WHERE entity = ?1")
            .bind(entity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_field(&self, entity: &str, field: &FieldSpec) -> Result<()> {
        // One column per ALTER TABLE statement on SQLite.
        let sql = {
            let mut stmt = Table::alter();
            stmt.table(Alias::new(entity)).add_column(column_def(field));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await
    }

    async fn drop_field(&self, entity: &str, field: &str) -> Result<()> {
        let sql = {
            let mut stmt = Table::alter();
            stmt.table(Alias::new(entity)).drop_column(Alias::new(field));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await
    }

    async fn rename_field(&self, entity: &str, from: &str, to: &str) -> Result<()> {
        let sql = {
            let mut stmt = Table::alter();
            stmt.table(Alias::new(entity))
                .rename_column(Alias::new(from), Alias::new(to));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await?;

        // Relation bookkeeping follows the rename; SQLite already rewrites
        // real index definitions on RENAME COLUMN.
        sqlx::query("UPDATE schema_relation SET field = ?1 WHERE entity = ?2 AND field = ?3")
            .bind(to)
            .bind(entity)
            .bind(from)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn alter_field_type(
        &self,
        entity: &str,
        field: &str,
        field_type: &FieldType,
        nullable: bool,
    ) -> Result<()> {
        // SQLite has no ALTER COLUMN. Rebuild the table under a shadow name,
        // copy the rows, swap it in and re-create the indexes, all inside a
        // single transaction.
        let mut tx = self.pool.begin().await?;

        let columns = sqlx::query(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
        )
        .bind(entity)
        .fetch_all(&mut *tx)
        .await?;
        if columns.is_empty() {
            return Err(LedgerError::DependencyMissing(format!(
                "no such entity: {}",
                entity
            )));
        }

        let mut defs: Vec<String> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut found = false;
        for row in &columns {
            let name: String = row.try_get("name")?;
            let mut type_name: String = row.try_get("type")?;
            let mut not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            if name == field {
                found = true;
                type_name = sqlite_type_name(field_type);
                not_null = if nullable { 0 } else { 1 };
            }

            let mut def = format!("\"{}\" {}", name, type_name);
            if pk != 0 {
                def.push_str(" PRIMARY KEY");
            }
            if not_null != 0 {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = default {
                // dflt_value comes back already quoted.
                def.push_str(&format!(" DEFAULT {}", default));
            }
            defs.push(def);
            names.push(format!("\"{}\"", name));
        }
        if !found {
            return Err(LedgerError::DependencyMissing(format!(
                "no such field: {}.{}",
                entity, field
            )));
        }

        // Inline UNIQUE constraints only show up as auto-indexes without SQL;
        // carry them over as table constraints or the rebuild would drop them.
        let index_rows = sqlx::query(
            "SELECT name, origin FROM pragma_index_list(?1)",
        )
        .bind(entity)
        .fetch_all(&mut *tx)
        .await?;
        for row in &index_rows {
            let origin: String = row.try_get("origin")?;
            if origin != "u" {
                continue;
            }
            let index_name: String = row.try_get("name")?;
            let cols = sqlx::query("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .bind(&index_name)
                .fetch_all(&mut *tx)
                .await?;
            let cols: Vec<String> = cols
                .iter()
                .filter_map(|r| r.try_get::<String, _>("name").ok())
                .map(|c| format!("\"{}\"", c))
                .collect();
            if !cols.is_empty() {
                defs.push(format!("UNIQUE ({})", cols.join(", ")));
            }
        }

        // Named indexes are dropped with the table; save their SQL so they
        // can be re-created against the renamed table.
        let saved_indexes = sqlx::query(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
        )
        .bind(entity)
        .fetch_all(&mut *tx)
        .await?;
        let saved_indexes: Vec<String> = saved_indexes
            .iter()
            .filter_map(|r| r.try_get::<String, _>("sql").ok())
            .collect();

        let shadow = format!("{}__rebuild", entity);
        let column_list = names.join(", ");
        sqlx::query(&format!(
            "CREATE TABLE \"{}\" ({})",
            shadow,
            defs.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify_store_error)?;
        sqlx::query(&format!(
            "INSERT INTO \"{}\" ({}) SELECT {} FROM \"{}\"",
            shadow, column_list, column_list, entity
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify_store_error)?;
        sqlx::query(&format!("DROP TABLE \"{}\"", entity))
            .execute(&mut *tx)
            .await
            .map_err(classify_store_error)?;
        sqlx::query(&format!(
            "ALTER TABLE \"{}\" RENAME TO \"{}\"",
            shadow, entity
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify_store_error)?;
        for sql in &saved_indexes {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(classify_store_error)?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_index(
        &self,
        entity: &str,
        name: &str,
        fields: &[String],
        unique: bool,
    ) -> Result<()> {
        let sql = {
            let mut stmt = Index::create();
            stmt.name(name).table(Alias::new(entity));
            for field in fields {
                stmt.col(Alias::new(field));
            }
            if unique {
                stmt.unique();
            }
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await
    }

    async fn drop_index(&self, entity: &str, name: &str) -> Result<()> {
        let sql = {
            let mut stmt = Index::drop();
            stmt.name(name).table(Alias::new(entity));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await
    }

    async fn add_relation(
        &self,
        entity: &str,
        name: &str,
        field: &str,
        references: &str,
        referenced_field: &str,
        on_delete: ReferentialAction,
    ) -> Result<()> {
        self.require_field(entity, field).await?;
        self.require_field(references, referenced_field).await?;

        sqlx::query(
            r#"
            INSERT INTO schema_relation
                (entity, name, field, referenced_entity, referenced_field, on_delete)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entity)
        .bind(name)
        .bind(field)
        .bind(references)
        .bind(referenced_field)
        .bind(on_delete.to_string())
        .execute(&self.pool)
        .await
        .map_err(classify_store_error)?;

        // SQLite cannot add a foreign key to an existing table; back the
        // relation with an index on the referencing field instead.
        let sql = {
            let mut stmt = Index::create();
            stmt.if_not_exists()
                .name(relation_index_name(name))
                .table(Alias::new(entity))
                .col(Alias::new(field));
            stmt.to_string(SqliteQueryBuilder)
        };
        self.run_ddl(&sql).await?;

        warn!(
            "relation {} ({}.{} -> {}.{}, on delete {}) is advisory: SQLite cannot enforce a foreign key added after table creation",
            name, entity, field, references, referenced_field, on_delete
        );
        Ok(())
    }

    async fn drop_relation(&self, entity: &str, name: &str) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM schema_relation WHERE entity = ?1 AND name = ?2")
            .bind(entity)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(LedgerError::DependencyMissing(format!(
                "no such relation: {} on {}",
                name, entity
            )));
        }

        sqlx::query(&format!(
            "DROP INDEX IF EXISTS \"{}\"",
            relation_index_name(name)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rename_relation(&self, entity: &str, from: &str, to: &str) -> Result<()> {
        let updated =
            sqlx::query("UPDATE schema_relation SET name = ?1 WHERE entity = ?2 AND name = ?3")
                .bind(to)
                .bind(entity)
                .bind(from)
                .execute(&self.pool)
                .await
                .map_err(classify_store_error)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::DependencyMissing(format!(
                "no such relation: {} on {}",
                from, entity
            )));
        }

        // Move the supporting index along with the name.
        let row =
            sqlx::query("SELECT field FROM schema_relation WHERE entity = ?1 AND name = ?2")
                .bind(entity)
                .bind(to)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(row) = row {
            let field: String = row.try_get("field")?;
            sqlx::query(&format!(
                "DROP INDEX IF EXISTS \"{}\"",
                relation_index_name(from)
            ))
            .execute(&self.pool)
            .await?;
            let sql = {
                let mut stmt = Index::create();
                stmt.if_not_exists()
                    .name(relation_index_name(to))
                    .table(Alias::new(entity))
                    .col(Alias::new(&field));
                stmt.to_string(SqliteQueryBuilder)
            };
            self.run_ddl(&sql).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for SqliteExecutor {
    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT change_id, name, applied_at FROM schema_ledger ORDER BY change_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn contains(&self, id: &ChangeId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM schema_ledger WHERE change_id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_ledger (change_id, name, applied_at) VALUES (?1, ?2, ?3)",
        )
        .bind(entry.change_id.as_str())
        .bind(&entry.name)
        .bind(entry.applied_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(classify_store_error)?;
        Ok(())
    }

    async fn remove(&self, id: &ChangeId) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM schema_ledger WHERE change_id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("ledger entry: {}", id)));
        }
        Ok(())
    }

    async fn recent(&self, n: usize) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT change_id, name, applied_at FROM schema_ledger ORDER BY change_id DESC LIMIT ?1",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ledger_entry_from_row).collect()
    }
}

fn ledger_entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry> {
    let change_id: String = row.try_get("change_id")?;
    let name: String = row.try_get("name")?;
    let applied_at: String = row.try_get("applied_at")?;
    let applied_at = DateTime::parse_from_rfc3339(&applied_at)
        .map_err(|e| LedgerError::Database(format!("Invalid timestamp in ledger: {}", e)))?
        .with_timezone(&Utc);
    Ok(LedgerEntry {
        change_id: ChangeId::new(change_id)?,
        name,
        applied_at,
    })
}
