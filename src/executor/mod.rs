// Structural-change executors

use crate::change::{ChangeId, LedgerEntry};
use crate::error::Result;
use crate::operation::{FieldSpec, FieldType, Operation, ReferentialAction};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryExecutor;
pub use sqlite::SqliteExecutor;

/// Performs structural mutations against the target store.
///
/// One method per operation variant. Executors do their own existence
/// checking and report `OperationConflict` / `DependencyMissing` through
/// their error values; callers never pre-check structural state.
#[async_trait::async_trait]
pub trait Executor {
    async fn create_entity(&self, entity: &str, fields: &[FieldSpec]) -> Result<()>;

    async fn drop_entity(&self, entity: &str) -> Result<()>;

    async fn add_field(&self, entity: &str, field: &FieldSpec) -> Result<()>;

    async fn drop_field(&self, entity: &str, field: &str) -> Result<()>;

    async fn rename_field(&self, entity: &str, from: &str, to: &str) -> Result<()>;

    async fn alter_field_type(
        &self,
        entity: &str,
        field: &str,
        field_type: &FieldType,
        nullable: bool,
    ) -> Result<()>;

    async fn create_index(
        &self,
        entity: &str,
        name: &str,
        fields: &[String],
        unique: bool,
    ) -> Result<()>;

    async fn drop_index(&self, entity: &str, name: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn add_relation(
        &self,
        entity: &str,
        name: &str,
        field: &str,
        references: &str,
        referenced_field: &str,
        on_delete: ReferentialAction,
    ) -> Result<()>;

    async fn drop_relation(&self, entity: &str, name: &str) -> Result<()>;

    async fn rename_relation(&self, entity: &str, from: &str, to: &str) -> Result<()>;

    /// Dispatch a single operation to the matching method.
    async fn execute(&self, op: &Operation) -> Result<()> {
        match op {
            Operation::CreateEntity { entity, fields } => {
                self.create_entity(entity, fields).await
            }
            Operation::DropEntity { entity } => self.drop_entity(entity).await,
            Operation::AddField { entity, field } => self.add_field(entity, field).await,
            Operation::DropField { entity, field } => self.drop_field(entity, field).await,
            Operation::RenameField { entity, from, to } => {
                self.rename_field(entity, from, to).await
            }
            Operation::AlterFieldType {
                entity,
                field,
                field_type,
                nullable,
            } => {
                self.alter_field_type(entity, field, field_type, *nullable)
                    .await
            }
            Operation::CreateIndex {
                entity,
                name,
                fields,
                unique,
            } => self.create_index(entity, name, fields, *unique).await,
            Operation::DropIndex { entity, name } => self.drop_index(entity, name).await,
            Operation::AddRelation {
                entity,
                name,
                field,
                references,
                referenced_field,
                on_delete,
            } => {
                self.add_relation(entity, name, field, references, referenced_field, *on_delete)
                    .await
            }
            Operation::DropRelation { entity, name } => self.drop_relation(entity, name).await,
            Operation::RenameRelation { entity, from, to } => {
                self.rename_relation(entity, from, to).await
            }
        }
    }
}

/// The persisted, append-only record of applied changes.
///
/// Implemented by each executor against its own store, so ledger state and
/// structural state live in the same place and never drift apart across
/// stores.
#[async_trait::async_trait]
pub trait LedgerStore {
    /// All entries in ascending change-id order.
    async fn entries(&self) -> Result<Vec<LedgerEntry>>;

    async fn contains(&self, id: &ChangeId) -> Result<bool>;

    async fn append(&self, entry: &LedgerEntry) -> Result<()>;

    async fn remove(&self, id: &ChangeId) -> Result<()>;

    /// The most recent `n` entries, newest first.
    async fn recent(&self, n: usize) -> Result<Vec<LedgerEntry>>;
}
