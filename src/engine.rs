//! The ledger engine.
//!
//! Reads the applied position from the target store, diffs it against the
//! authored change definitions, and folds apply/revert over the pending
//! records. The ledger entry for a record is only written after every one of
//! its forward operations has executed, and only removed after every
//! backward operation has executed, so the ledger always reflects exactly
//! which records completed.

use crate::change::{ChangeId, ChangeRecord, ChangeStatus, Direction, LedgerEntry};
use crate::error::{LedgerError, Result};
use crate::executor::{Executor, LedgerStore};
use crate::source::ChangeSource;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Applies and reverses ordered schema changes against a target store.
///
/// No structural state is cached between calls; every invocation reads the
/// ledger from the store, so out-of-band changes are picked up instead of
/// going stale.
pub struct LedgerEngine<S, E> {
    source: S,
    executor: E,
}

impl<S, E> LedgerEngine<S, E>
where
    S: ChangeSource,
    E: Executor + LedgerStore + Sync,
{
    pub fn new(source: S, executor: E) -> Self {
        Self { source, executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// All authored records, validated to be unique and in ascending id
    /// order.
    fn ordered_records(&self) -> Result<Vec<ChangeRecord>> {
        let records = self.source.all_records()?;
        for pair in records.windows(2) {
            if pair[1].id <= pair[0].id {
                if pair[1].id == pair[0].id {
                    return Err(LedgerError::DuplicateChangeId(pair[1].id.to_string()));
                }
                return Err(LedgerError::UnorderedDefinitions(format!(
                    "{} follows {}",
                    pair[1].id, pair[0].id
                )));
            }
        }
        Ok(records)
    }

    /// Number of applied records, after checking that the ledger forms a
    /// contiguous prefix of the record sequence.
    async fn applied_prefix(&self, records: &[ChangeRecord]) -> Result<usize> {
        let entries = self.executor.entries().await?;
        for (entry, record) in entries.iter().zip(records.iter()) {
            if entry.change_id != record.id {
                return Err(LedgerError::LedgerDiverged(format!(
                    "ledger has {} where definitions expect {}",
                    entry.change_id, record.id
                )));
            }
        }
        if entries.len() > records.len() {
            return Err(LedgerError::LedgerDiverged(format!(
                "ledger has {} entries but only {} definitions are known",
                entries.len(),
                records.len()
            )));
        }
        Ok(entries.len())
    }

    /// Records not yet at the requested position, in execution order:
    /// ascending for `Up`, descending for `Down`. For `Up` the target is
    /// included; for `Down` the target remains applied.
    pub async fn pending(
        &self,
        direction: Direction,
        target: Option<&ChangeId>,
    ) -> Result<Vec<ChangeRecord>> {
        let records = self.ordered_records()?;

        let target_index = match target {
            Some(target) => Some(
                records
                    .iter()
                    .position(|r| &r.id == target)
                    .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?,
            ),
            None => None,
        };

        let applied = self.applied_prefix(&records).await?;

        let pending = match direction {
            Direction::Up => {
                let end = match target_index {
                    Some(t) if t + 1 < records.len() => t + 1,
                    _ => records.len(),
                };
                if end <= applied {
                    Vec::new()
                } else {
                    records[applied..end].to_vec()
                }
            }
            Direction::Down => {
                let keep = match target_index {
                    // The target itself stays applied.
                    Some(t) => t + 1,
                    None => 0,
                };
                if keep >= applied {
                    Vec::new()
                } else {
                    let mut down = records[keep..applied].to_vec();
                    down.reverse();
                    down
                }
            }
        };
        Ok(pending)
    }

    /// Execute a record's forward operations in declared order, then append
    /// the ledger entry.
    pub async fn apply(&self, record: &ChangeRecord) -> Result<()> {
        if self.executor.contains(&record.id).await? {
            return Err(LedgerError::OperationConflict(format!(
                "change already applied: {}",
                record.id
            )));
        }

        debug!("applying change {} ({})", record.id, record.name);
        for op in &record.forward {
            debug!("  {}", op.describe());
            self.executor
                .execute(op)
                .await
                .map_err(|e| e.in_change(&record.id, op.describe()))?;
        }

        self.executor
            .append(&LedgerEntry {
                change_id: record.id.clone(),
                name: record.name.clone(),
                applied_at: Utc::now(),
            })
            .await?;
        info!("applied change {} ({})", record.id, record.name);
        Ok(())
    }

    /// Execute a record's backward operations in reverse of the declared
    /// order, then remove the ledger entry.
    pub async fn revert(&self, record: &ChangeRecord) -> Result<()> {
        if !self.executor.contains(&record.id).await? {
            return Err(LedgerError::NotFound(format!(
                "change is not applied: {}",
                record.id
            )));
        }

        debug!("reverting change {} ({})", record.id, record.name);
        for op in record.backward.iter().rev() {
            if op.is_constant_backfill() {
                warn!(
                    "reverting {}: {} backfills with a constant default; values removed by the forward change are not restored",
                    record.id,
                    op.describe()
                );
            } else if op.is_destructive() {
                warn!(
                    "reverting {}: {} discards data written since the change was applied",
                    record.id,
                    op.describe()
                );
            }
            debug!("  {}", op.describe());
            self.executor
                .execute(op)
                .await
                .map_err(|e| e.in_change(&record.id, op.describe()))?;
        }

        self.executor.remove(&record.id).await?;
        info!("reverted change {} ({})", record.id, record.name);
        Ok(())
    }

    /// Fold apply/revert over the pending records, stopping at the first
    /// failure. Records completed before the failure stay applied; the error
    /// names the offending record and operation.
    pub async fn migrate(
        &self,
        direction: Direction,
        target: Option<&ChangeId>,
    ) -> Result<Vec<ChangeId>> {
        let pending = self.pending(direction, target).await?;
        if pending.is_empty() {
            info!("ledger already at the requested position, nothing to do");
            return Ok(Vec::new());
        }

        info!(
            "migrating {} across {} change(s)",
            direction,
            pending.len()
        );
        let mut completed = Vec::with_capacity(pending.len());
        for record in &pending {
            let step = match direction {
                Direction::Up => self.apply(record).await,
                Direction::Down => self.revert(record).await,
            };
            if let Err(e) = step {
                warn!(
                    "stopping after {} of {} change(s): {}",
                    completed.len(),
                    pending.len(),
                    e
                );
                return Err(e);
            }
            completed.push(record.id.clone());
        }
        info!("migration {} complete, {} change(s)", direction, completed.len());
        Ok(completed)
    }

    /// Every known record with its applied timestamp, in definition order.
    pub async fn status(&self) -> Result<Vec<ChangeStatus>> {
        let records = self.ordered_records()?;
        let applied: BTreeMap<ChangeId, LedgerEntry> = self
            .executor
            .entries()
            .await?
            .into_iter()
            .map(|e| (e.change_id.clone(), e))
            .collect();
        Ok(records
            .into_iter()
            .map(|record| {
                let applied_at = applied.get(&record.id).map(|e| e.applied_at);
                ChangeStatus {
                    id: record.id,
                    name: record.name,
                    applied_at,
                }
            })
            .collect())
    }
}
