//! Canonical registry storage.
//!
//! The registry is the only shared mutable state in the system. It holds:
//!
//! - the canonical documents, one per topic key
//! - the fingerprint ledger: what each source document looked like when it
//!   was last processed, which is what incremental runs diff against
//! - the watermark: newest source timestamp seen so far
//! - recorded run reports
//!
//! Writers go through [`CanonicalStore::commit`], which applies a whole
//! [`CommitBatch`] atomically and only if nobody else committed since the
//! batch's snapshot was taken (optimistic concurrency on `version`).
//! Readers always see a complete snapshot, before or after a commit.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::source::{DocId, TopicKey};
use crate::sync::RunReport;
use crate::synthesis::CanonicalDocument;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from a registry backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Another writer committed since the batch's snapshot.
    #[error("Registry version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the batch was staged against
        expected: u64,
        /// Current registry version
        actual: u64,
    },

    /// SQLite failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON could not be read or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data is not in the expected shape.
    #[error("Corrupt registry: {0}")]
    Corrupt(String),

    /// A lock was poisoned by a panicking writer.
    #[error("Registry lock poisoned")]
    Poisoned,
}

/// What a source document looked like when last processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub collection: String,
    pub topic_key: TopicKey,
    pub modified: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// Consistent view of the registry at one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub entries: BTreeMap<TopicKey, CanonicalDocument>,
    pub ledger: BTreeMap<DocId, LedgerEntry>,
    pub watermark: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn get(&self, topic: &TopicKey) -> Option<&CanonicalDocument> {
        self.entries.get(topic)
    }

    /// Apply a batch in place. Does not check or bump the version.
    pub fn apply(&mut self, batch: &CommitBatch) {
        for doc in &batch.changes {
            self.entries.insert(doc.topic_key.clone(), doc.clone());
        }
        match &batch.ledger {
            LedgerUpdate::Replace(ledger) => self.ledger = ledger.clone(),
            LedgerUpdate::Merge(updates) => {
                self.ledger
                    .extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        self.watermark = self.watermark.max(batch.watermark);
    }
}

/// Ledger changes carried by a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerUpdate {
    /// Full runs replace the ledger with the listed corpus.
    Replace(BTreeMap<DocId, LedgerEntry>),
    /// Incremental runs merge changed entries.
    Merge(BTreeMap<DocId, LedgerEntry>),
}

/// Everything one run writes, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    /// Registry version the batch was staged against
    pub base_version: u64,
    /// Canonical documents to insert or replace
    pub changes: Vec<CanonicalDocument>,
    pub ledger: LedgerUpdate,
    /// Newest source timestamp observed by the run
    pub watermark: Option<DateTime<Utc>>,
}

/// The canonical collection, its ledger and run history.
pub trait CanonicalStore: Send + Sync {
    /// Canonical document for a topic.
    fn get(&self, topic: &TopicKey) -> Result<Option<CanonicalDocument>, StoreError>;

    /// Insert or replace one canonical document outside a run.
    ///
    /// Bumps the version, so concurrent runs staged earlier will conflict.
    fn upsert(&self, doc: CanonicalDocument) -> Result<u64, StoreError>;

    /// Consistent snapshot of the whole registry.
    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError>;

    /// Atomically apply `batch` if the version still equals
    /// `batch.base_version`. Returns the new version.
    fn commit(&self, batch: CommitBatch) -> Result<u64, StoreError>;

    /// Persist a run report.
    fn record_run(&self, report: &RunReport) -> Result<(), StoreError>;

    /// Recorded run reports, oldest first.
    fn runs(&self) -> Result<Vec<RunReport>, StoreError>;
}
