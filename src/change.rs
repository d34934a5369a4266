use crate::error::{LedgerError, Result};
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a single schema change.
///
/// Ids follow the timestamp-derived naming used by the change files
/// themselves, e.g. `m20240101_000001_create_students`: lowercase
/// alphanumerics and underscores, starting with an alphanumeric.
/// Lexicographic order on the id string is the application order, which is
/// why the timestamp prefix matters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeId(String);

impl ChangeId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let mut chars = id.chars();
        let valid_head = chars
            .next()
            .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .unwrap_or(false);
        let valid_tail =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_head || !valid_tail {
            return Err(LedgerError::InvalidChangeId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChangeId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ChangeId> for String {
    fn from(value: ChangeId) -> Self {
        value.0
    }
}

/// One unit of schema evolution: an ordered forward operation list paired
/// with the backward list that undoes it.
///
/// The backward list is authored parallel to the forward list (`backward[i]`
/// undoes `forward[i]`); the engine runs it in reverse on revert. Records are
/// immutable once authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub name: String,
    pub forward: Vec<Operation>,
    pub backward: Vec<Operation>,
}

impl ChangeRecord {
    pub fn new(
        id: ChangeId,
        name: impl Into<String>,
        forward: Vec<Operation>,
        backward: Vec<Operation>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            forward,
            backward,
        }
    }
}

/// One row of the persisted ledger: a change that has been applied to the
/// target store, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub change_id: ChangeId,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Migration direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Status row for one known change: applied (with timestamp) or pending.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeStatus {
    pub id: ChangeId,
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl ChangeStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}
