//! In-memory executor.
//!
//! Holds the full structural model (entities, fields, indexes, relations)
//! and reports conflicts and missing dependencies exactly as a real store
//! would. Doubles as a dry-run backend and as the reference model for shape
//! assertions in tests.

use crate::change::{ChangeId, LedgerEntry};
use crate::error::{LedgerError, Result};
use crate::executor::{Executor, LedgerStore};
use crate::operation::{FieldSpec, FieldType, ReferentialAction};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Index definition as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexShape {
    pub fields: Vec<String>,
    pub unique: bool,
}

/// Relation definition as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationShape {
    pub field: String,
    pub references: String,
    pub referenced_field: String,
    pub on_delete: ReferentialAction,
}

/// Structural shape of one entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityShape {
    pub fields: BTreeMap<String, FieldSpec>,
    pub indexes: BTreeMap<String, IndexShape>,
    pub relations: BTreeMap<String, RelationShape>,
}

/// Structural shape of the whole store, keyed by entity name.
pub type SchemaShape = BTreeMap<String, EntityShape>;

#[derive(Default)]
struct MemoryState {
    schema: SchemaShape,
    ledger: Vec<LedgerEntry>,
}

/// Executor backed by an in-memory schema model.
#[derive(Default)]
pub struct MemoryExecutor {
    state: Mutex<MemoryState>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current structural shape.
    pub async fn shape(&self) -> SchemaShape {
        self.state.lock().await.schema.clone()
    }
}

fn entity_mut<'a>(schema: &'a mut SchemaShape, entity: &str) -> Result<&'a mut EntityShape> {
    schema
        .get_mut(entity)
        .ok_or_else(|| LedgerError::DependencyMissing(format!("no such entity: {}", entity)))
}

#[async_trait::async_trait]
impl Executor for MemoryExecutor {
    async fn create_entity(&self, entity: &str, fields: &[FieldSpec]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.schema.contains_key(entity) {
            return Err(LedgerError::OperationConflict(format!(
                "entity already exists: {}",
                entity
            )));
        }
        let mut shape = EntityShape::default();
        for field in fields {
            if shape.fields.insert(field.name.clone(), field.clone()).is_some() {
                return Err(LedgerError::InvalidDefinition(format!(
                    "duplicate field {} in entity {}",
                    field.name, entity
                )));
            }
        }
        state.schema.insert(entity.to_string(), shape);
        Ok(())
    }

    async fn drop_entity(&self, entity: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.schema.contains_key(entity) {
            return Err(LedgerError::DependencyMissing(format!(
                "no such entity: {}",
                entity
            )));
        }
        // Refuse while other entities still hold relations into this one.
        for (other, shape) in state.schema.iter() {
            if other == entity {
                continue;
            }
            if let Some((name, _)) = shape
                .relations
                .iter()
                .find(|(_, r)| r.references == entity)
            {
                return Err(LedgerError::OperationConflict(format!(
                    "entity {} is referenced by relation {} on {}",
                    entity, name, other
                )));
            }
        }
        state.schema.remove(entity);
        Ok(())
    }

    async fn add_field(&self, entity: &str, field: &FieldSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.fields.contains_key(&field.name) {
            return Err(LedgerError::OperationConflict(format!(
                "field already exists: {}.{}",
                entity, field.name
            )));
        }
        shape.fields.insert(field.name.clone(), field.clone());
        Ok(())
    }

    async fn drop_field(&self, entity: &str, field: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if !shape.fields.contains_key(field) {
            return Err(LedgerError::DependencyMissing(format!(
                "no such field: {}.{}",
                entity, field
            )));
        }
        if let Some((name, _)) = shape
            .indexes
            .iter()
            .find(|(_, i)| i.fields.iter().any(|f| f == field))
        {
            return Err(LedgerError::OperationConflict(format!(
                "field {}.{} is used by index {}",
                entity, field, name
            )));
        }
        if let Some((name, _)) = shape.relations.iter().find(|(_, r)| r.field == field) {
            return Err(LedgerError::OperationConflict(format!(
                "field {}.{} is used by relation {}",
                entity, field, name
            )));
        }
        shape.fields.remove(field);
        Ok(())
    }

    async fn rename_field(&self, entity: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.fields.contains_key(to) {
            return Err(LedgerError::OperationConflict(format!(
                "field already exists: {}.{}",
                entity, to
            )));
        }
        match shape.fields.remove(from) {
            Some(mut field) => {
                field.name = to.to_string();
                shape.fields.insert(to.to_string(), field);
            }
            None => {
                return Err(LedgerError::DependencyMissing(format!(
                    "no such field: {}.{}",
                    entity, from
                )))
            }
        }
        // Indexes and relations follow the rename, as stores do.
        for index in shape.indexes.values_mut() {
            for f in index.fields.iter_mut() {
                if f == from {
                    *f = to.to_string();
                }
            }
        }
        for relation in shape.relations.values_mut() {
            if relation.field == from {
                relation.field = to.to_string();
            }
        }
        Ok(())
    }

    async fn alter_field_type(
        &self,
        entity: &str,
        field: &str,
        field_type: &FieldType,
        nullable: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        let spec = shape.fields.get_mut(field).ok_or_else(|| {
            LedgerError::DependencyMissing(format!("no such field: {}.{}", entity, field))
        })?;
        spec.field_type = field_type.clone();
        spec.nullable = nullable;
        Ok(())
    }

    async fn create_index(
        &self,
        entity: &str,
        name: &str,
        fields: &[String],
        unique: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.indexes.contains_key(name) {
            return Err(LedgerError::OperationConflict(format!(
                "index already exists: {}",
                name
            )));
        }
        for field in fields {
            if !shape.fields.contains_key(field) {
                return Err(LedgerError::DependencyMissing(format!(
                    "no such field: {}.{}",
                    entity, field
                )));
            }
        }
        shape.indexes.insert(
            name.to_string(),
            IndexShape {
                fields: fields.to_vec(),
                unique,
            },
        );
        Ok(())
    }

    async fn drop_index(&self, entity: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.indexes.remove(name).is_none() {
            return Err(LedgerError::DependencyMissing(format!(
                "no such index: {} on {}",
                name, entity
            )));
        }
        Ok(())
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
        let mut state = self.state.lock().await;
        if !state.schema.contains_key(references) {
            return Err(LedgerError::DependencyMissing(format!(
                "no such entity: {}",
                references
            )));
        }
        let referenced_ok = state
            .schema
            .get(references)
            .map(|s| s.fields.contains_key(referenced_field))
            .unwrap_or(false);
        if !referenced_ok {
            return Err(LedgerError::DependencyMissing(format!(
                "no such field: {}.{}",
                references, referenced_field
            )));
        }
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.relations.contains_key(name) {
            return Err(LedgerError::OperationConflict(format!(
                "relation already exists: {}",
                name
            )));
        }
        if !shape.fields.contains_key(field) {
            return Err(LedgerError::DependencyMissing(format!(
                "no such field: {}.{}",
                entity, field
            )));
        }
        shape.relations.insert(
            name.to_string(),
            RelationShape {
                field: field.to_string(),
                references: references.to_string(),
                referenced_field: referenced_field.to_string(),
                on_delete,
            },
        );
        Ok(())
    }

    async fn drop_relation(&self, entity: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.relations.remove(name).is_none() {
            return Err(LedgerError::DependencyMissing(format!(
                "no such relation: {} on {}",
                name, entity
            )));
        }
        Ok(())
    }

    async fn rename_relation(&self, entity: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let shape = entity_mut(&mut state.schema, entity)?;
        if shape.relations.contains_key(to) {
            return Err(LedgerError::OperationConflict(format!(
                "relation already exists: {}",
                to
            )));
        }
        match shape.relations.remove(from) {
            Some(relation) => {
                shape.relations.insert(to.to_string(), relation);
                Ok(())
            }
            None => Err(LedgerError::DependencyMissing(format!(
                "no such relation: {} on {}",
                from, entity
            ))),
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryExecutor {
    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut entries = state.ledger.clone();
        entries.sort_by(|a, b| a.change_id.cmp(&b.change_id));
        Ok(entries)
    }

    async fn contains(&self, id: &ChangeId) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.ledger.iter().any(|e| &e.change_id == id))
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.ledger.iter().any(|e| e.change_id == entry.change_id) {
            return Err(LedgerError::OperationConflict(format!(
                "ledger entry already exists: {}",
                entry.change_id
            )));
        }
        state.ledger.push(entry.clone());
        Ok(())
    }

    async fn remove(&self, id: &ChangeId) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.ledger.len();
        state.ledger.retain(|e| &e.change_id != id);
        if state.ledger.len() == before {
            return Err(LedgerError::NotFound(format!("ledger entry: {}", id)));
        }
        Ok(())
    }

    async fn recent(&self, n: usize) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.entries().await?;
        entries.reverse();
        entries.truncate(n);
        Ok(entries)
    }
}
