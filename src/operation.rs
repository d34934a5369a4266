//! Structural operation model.
//!
//! Every schema change is expressed as data through the [`Operation`] enum
//! rather than hand-written per-change control flow, so executors can be
//! driven from authored definitions alone.

use serde::{Deserialize, Serialize};

/// Column type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal { precision: u32, scale: u32 },
    Boolean,
    Date,
    DateTime,
}

/// Default value carried by a field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    Text(String),
    Integer(i64),
    Decimal(String),
    Boolean(bool),
    /// The store's current-timestamp expression.
    Now,
}

/// What happens to referencing rows when the referenced row is deleted.
///
/// Preserved exactly as authored; changing it silently changes data-loss
/// semantics on entity deletion.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
}

/// Full definition of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            max_length: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A single structural mutation against the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateEntity {
        entity: String,
        fields: Vec<FieldSpec>,
    },
    DropEntity {
        entity: String,
    },
    AddField {
        entity: String,
        field: FieldSpec,
    },
    DropField {
        entity: String,
        field: String,
    },
    RenameField {
        entity: String,
        from: String,
        to: String,
    },
    AlterFieldType {
        entity: String,
        field: String,
        field_type: FieldType,
        nullable: bool,
    },
    CreateIndex {
        entity: String,
        name: String,
        fields: Vec<String>,
        unique: bool,
    },
    DropIndex {
        entity: String,
        name: String,
    },
    AddRelation {
        entity: String,
        name: String,
        field: String,
        references: String,
        referenced_field: String,
        on_delete: ReferentialAction,
    },
    DropRelation {
        entity: String,
        name: String,
    },
    RenameRelation {
        entity: String,
        from: String,
        to: String,
    },
}

impl Operation {
    /// The entity this operation targets.
    pub fn entity(&self) -> &str {
        match self {
            Operation::CreateEntity { entity, .. }
            | Operation::DropEntity { entity }
            | Operation::AddField { entity, .. }
            | Operation::DropField { entity, .. }
            | Operation::RenameField { entity, .. }
            | Operation::AlterFieldType { entity, .. }
            | Operation::CreateIndex { entity, .. }
            | Operation::DropIndex { entity, .. }
            | Operation::AddRelation { entity, .. }
            | Operation::DropRelation { entity, .. }
            | Operation::RenameRelation { entity, .. } => entity,
        }
    }

    /// Short human-readable form for logs and error context.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateEntity { entity, .. } => format!("create_entity {}", entity),
            Operation::DropEntity { entity } => format!("drop_entity {}", entity),
            Operation::AddField { entity, field } => {
                format!("add_field {}.{}", entity, field.name)
            }
            Operation::DropField { entity, field } => format!("drop_field {}.{}", entity, field),
            Operation::RenameField { entity, from, to } => {
                format!("rename_field {}.{} -> {}", entity, from, to)
            }
            Operation::AlterFieldType { entity, field, .. } => {
                format!("alter_field_type {}.{}", entity, field)
            }
            Operation::CreateIndex { entity, name, .. } => {
                format!("create_index {} on {}", name, entity)
            }
            Operation::DropIndex { entity, name } => {
                format!("drop_index {} on {}", name, entity)
            }
            Operation::AddRelation {
                entity, name, references, ..
            } => format!("add_relation {} ({} -> {})", name, entity, references),
            Operation::DropRelation { entity, name } => {
                format!("drop_relation {} on {}", name, entity)
            }
            Operation::RenameRelation { entity, from, to } => {
                format!("rename_relation {}.{} -> {}", entity, from, to)
            }
        }
    }

    /// Whether executing this operation can destroy stored data.
    ///
    /// Altering a field type counts: the store may coerce or truncate values
    /// during the rewrite.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Operation::DropEntity { .. }
                | Operation::DropField { .. }
                | Operation::AlterFieldType { .. }
        )
    }

    /// Whether this operation re-creates a field with a constant backfill.
    ///
    /// Such an operation appearing in a backward list means the down
    /// migration cannot restore the values the forward drop removed.
    pub fn is_constant_backfill(&self) -> bool {
        match self {
            Operation::AddField { field, .. } => {
                matches!(
                    field.default,
                    Some(DefaultValue::Text(_))
                        | Some(DefaultValue::Integer(_))
                        | Some(DefaultValue::Decimal(_))
                        | Some(DefaultValue::Boolean(_))
                )
            }
            _ => false,
        }
    }
}
