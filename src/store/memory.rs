//! In-memory registry.

use std::sync::RwLock;

use super::{CanonicalStore, CommitBatch, LedgerUpdate, RegistrySnapshot, StoreError};
use crate::source::TopicKey;
use crate::sync::RunReport;
use crate::synthesis::CanonicalDocument;

/// Registry held in memory behind a single lock.
///
/// Commits build the next snapshot from a copy and swap it in while holding
/// the write lock, so readers never observe a half-applied batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<RegistrySnapshot>,
    runs: RwLock<Vec<RunReport>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonicalStore for MemoryStore {
    fn get(&self, topic: &TopicKey) -> Result<Option<CanonicalDocument>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.entries.get(topic).cloned())
    }

    fn upsert(&self, doc: CanonicalDocument) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.entries.insert(doc.topic_key.clone(), doc);
        state.version += 1;
        Ok(state.version)
    }

    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError> {
        Ok(self.state.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn commit(&self, batch: CommitBatch) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if state.version != batch.base_version {
            return Err(StoreError::VersionConflict {
                expected: batch.base_version,
                actual: state.version,
            });
        }

        let mut next = state.clone();
        next.apply(&batch);
        next.version += 1;
        *state = next;

        log::debug!(
            "Committed {} change(s) ({} ledger) at version {}",
            batch.changes.len(),
            match &batch.ledger {
                LedgerUpdate::Replace(l) | LedgerUpdate::Merge(l) => l.len(),
            },
            state.version
        );
        Ok(state.version)
    }

    fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        self.runs
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .push(report.clone());
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunReport>, StoreError> {
        Ok(self.runs.read().map_err(|_| StoreError::Poisoned)?.clone())
    }
}
