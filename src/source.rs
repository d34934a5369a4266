//! Change-definition sources.

use crate::change::{ChangeId, ChangeRecord};
use crate::error::{LedgerError, Result};
use std::path::{Path, PathBuf};

/// Supplies the authored, ordered change records.
pub trait ChangeSource {
    /// All records in authored order.
    fn all_records(&self) -> Result<Vec<ChangeRecord>>;

    /// A single record by id.
    fn record(&self, id: &ChangeId) -> Result<ChangeRecord>;
}

/// Source over an in-memory list of records.
pub struct StaticSource {
    records: Vec<ChangeRecord>,
}

impl StaticSource {
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }
}

impl ChangeSource for StaticSource {
    fn all_records(&self) -> Result<Vec<ChangeRecord>> {
        Ok(self.records.clone())
    }

    fn record(&self, id: &ChangeId) -> Result<ChangeRecord> {
        self.records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("change record: {}", id)))
    }
}

/// Source over a directory of JSON record files.
///
/// One record per `*.json` file:
///
/// ```json
/// {
///   "id": "m20240101_000001_create_students",
///   "name": "create students",
///   "forward": [ { "op": "create_entity", "entity": "students", "fields": [...] } ],
///   "backward": [ { "op": "drop_entity", "entity": "students" } ]
/// }
/// ```
///
/// Files are read in ascending id order regardless of file name; ids come
/// from the record body.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn load_file(path: &Path) -> Result<ChangeRecord> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            LedgerError::InvalidDefinition(format!("{}: {}", path.display(), e))
        })
    }
}

impl ChangeSource for DirectorySource {
    fn all_records(&self) -> Result<Vec<ChangeRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(Self::load_file(&path)?);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn record(&self, id: &ChangeId) -> Result<ChangeRecord> {
        self.all_records()?
            .into_iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| LedgerError::NotFound(format!("change record: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FieldSpec, FieldType, Operation};

    fn sample_record(id: &str) -> ChangeRecord {
        ChangeRecord::new(
            ChangeId::new(id).unwrap(),
            "sample",
            vec![Operation::CreateEntity {
                entity: "students".to_string(),
                fields: vec![FieldSpec::new("id", FieldType::Integer).primary_key()],
            }],
            vec![Operation::DropEntity {
                entity: "students".to_string(),
            }],
        )
    }

    #[test]
    fn test_static_source_lookup() {
        let source = StaticSource::new(vec![sample_record("m20240101_000001_init")]);
        let id = ChangeId::new("m20240101_000001_init").unwrap();
        assert_eq!(source.record(&id).unwrap().id, id);

        let missing = ChangeId::new("m20990101_000099_missing").unwrap();
        assert!(matches!(
            source.record(&missing).unwrap_err(),
            LedgerError::NotFound(_)
        ));
    }

    #[test]
    fn test_directory_source_reads_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();

        // File names deliberately out of order; the record ids decide.
        let second = sample_record("m20240202_000002_later");
        std::fs::write(
            dir.path().join("a_second.json"),
            serde_json::to_string_pretty(&second).unwrap(),
        )
        .unwrap();
        let first = sample_record("m20240101_000001_earlier");
        std::fs::write(
            dir.path().join("z_first.json"),
            serde_json::to_string_pretty(&first).unwrap(),
        )
        .unwrap();
        // Non-JSON files are ignored.
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let source = DirectorySource::new(dir.path());
        let records = source.all_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_str(), "m20240101_000001_earlier");
        assert_eq!(records[1].id.as_str(), "m20240202_000002_later");
    }

    #[test]
    fn test_directory_source_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let source = DirectorySource::new(dir.path());
        assert!(matches!(
            source.all_records().unwrap_err(),
            LedgerError::InvalidDefinition(_)
        ));
    }
}
