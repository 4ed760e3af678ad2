//! Run orchestration.
//!
//! [`SyncEngine::run_sync`] drives one run through its phases:
//!
//! 1. **List**: ask the source collection for entries (everything in full
//!    mode, entries modified since the watermark in incremental mode)
//! 2. **Read**: fetch content in parallel; unreadable documents are skipped
//!    for the run
//! 3. **Fingerprint**: hash and sketch each document read
//! 4. **Group**: cluster the corpus (fresh fingerprints over the ledger)
//! 5. **Score**: rubric scores for every member of a group being resolved
//! 6. **Resolve**: merge decision or escalation per group
//! 7. **Commit**: synthesize, stage, verify, then commit in one batch with
//!    bounded retry on concurrent writes
//!
//! Cancellation is checked between phases and inside the parallel phases.
//! Nothing is committed by a cancelled or aborted run, and every run ends
//! with a [`RunReport`] recorded in the store.

pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::config::{Config, ConfigError};
use crate::duplicates::{metric_for, DuplicateGroup, FingerprintedDoc, Grouper};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::progress::ProgressCallback;
use crate::resolve::{Candidate, ConflictKind, ConflictReport, DecisionAction, Resolution, Resolver};
use crate::scoring::{score_documents, Rubric, ScoreBreakdown};
use crate::signal::ShutdownHandler;
use crate::source::{DocId, Document, SourceCollection, SourceEntry, SourceError, TopicKey};
use crate::store::{
    CanonicalStore, CommitBatch, LedgerEntry, LedgerUpdate, RegistrySnapshot, StoreError,
};
use crate::synthesis::{CanonicalDocument, StagedRegistry, Synthesizer, VerifyError};

pub use report::{DecisionCounts, RunReport, RunStatus, SkippedDocument, SyncMode};

/// Run-level failures. Any of these aborts the run before commit.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The source collection could not be listed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The registry could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The staged set failed its consistency check.
    #[error("Staged registry failed verification: {0}")]
    Verify(#[from] VerifyError),

    /// Every commit attempt lost to a concurrent writer.
    #[error("Commit failed after {attempts} attempt(s): registry kept changing")]
    CommitRetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
    },

    /// The worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    Pool(String),

    /// Shutdown was requested.
    #[error("Run cancelled")]
    Cancelled,
}

/// What resolving one group produced.
enum GroupOutcome {
    Synthesized {
        doc: CanonicalDocument,
        members: Vec<DocId>,
    },
    Review(ConflictReport),
    /// No member could be read.
    Unreadable,
}

/// Result of staging every synthesized document against one snapshot.
struct Staging {
    changes: Vec<CanonicalDocument>,
    actions: Vec<DecisionAction>,
    collisions: Vec<ConflictReport>,
    unchanged: usize,
}

/// Runs deduplication and synthesis over one source collection into one
/// canonical store.
pub struct SyncEngine {
    config: Config,
    rubric: Rubric,
    fingerprinter: Fingerprinter,
    grouper: Grouper,
    resolver: Resolver,
    synthesizer: Synthesizer,
    source: Arc<dyn SourceCollection>,
    store: Arc<dyn CanonicalStore>,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("shutdown_flag", &self.shutdown_flag)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Build an engine. Fails if the configuration or scoring rubric is
    /// invalid, before any document is touched.
    pub fn new(
        config: Config,
        source: Arc<dyn SourceCollection>,
        store: Arc<dyn CanonicalStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rubric = Rubric::from_config(&config.scoring)?;
        Ok(Self {
            rubric,
            fingerprinter: Fingerprinter::new(
                config.similarity.shingle_size,
                config.similarity.signature_size,
            ),
            grouper: Grouper::from_config(&config.similarity),
            resolver: Resolver::from_config(&config.resolution),
            synthesizer: Synthesizer::from_config(&config.similarity),
            config,
            source,
            store,
            shutdown_flag: None,
            progress_callback: None,
        })
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Observe the flag of a [`ShutdownHandler`].
    #[must_use]
    pub fn with_shutdown_handler(self, handler: &ShutdownHandler) -> Self {
        self.with_shutdown_flag(handler.get_flag())
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.is_shutdown_requested() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn phase_start(&self, phase: &str, total: usize) {
        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_start(phase, total);
        }
    }

    fn phase_progress(&self, current: usize, item: &str) {
        if let Some(ref callback) = self.progress_callback {
            callback.on_progress(current, item);
        }
    }

    fn phase_end(&self, phase: &str) {
        if let Some(ref callback) = self.progress_callback {
            callback.on_phase_end(phase);
        }
    }

    /// Worker count: available cores, capped by `run.max_workers`.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(self.config.run.max_workers)
            .max(1)
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool, SyncError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_count())
            .build()
            .map_err(|e| SyncError::Pool(e.to_string()))
    }

    /// Execute one run.
    ///
    /// Always returns a report; run-level failures are reported as
    /// [`RunStatus::Aborted`], shutdown as [`RunStatus::Cancelled`]. The
    /// report is recorded in the store before it is returned.
    pub fn run_sync(&self, mode: SyncMode) -> RunReport {
        let mut report = RunReport::begin(mode);
        log::info!("Starting {mode} run {}", report.run_id);

        match self.execute(mode, &mut report) {
            Ok(()) => {
                log::info!(
                    "Run {} complete: {} processed, {} skipped, {} group(s), {} decision(s), {} flagged",
                    report.run_id,
                    report.documents_processed,
                    report.documents_skipped.len(),
                    report.groups_found,
                    report.decisions.total(),
                    report.flagged.len()
                );
            }
            Err(SyncError::Cancelled) => {
                log::warn!("Run {} cancelled, nothing committed", report.run_id);
                report.status = RunStatus::Cancelled;
            }
            Err(e) => {
                log::error!("Run {} aborted: {e}", report.run_id);
                report.status = RunStatus::Aborted {
                    reason: e.to_string(),
                };
            }
        }

        report.finished_at = Utc::now();
        if let Err(e) = self.store.record_run(&report) {
            log::warn!("Failed to record run {}: {e}", report.run_id);
        }
        report
    }

    fn execute(&self, mode: SyncMode, report: &mut RunReport) -> Result<(), SyncError> {
        let pool = self.build_pool()?;
        log::debug!("Using {} worker(s)", pool.current_num_threads());

        let snapshot = self.store.snapshot()?;
        let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => snapshot.watermark,
        };

        // Phase 1: list
        let listed = self.source.list(since)?;
        match since {
            Some(since) => log::info!("Phase 1: Listed {} document(s) modified since {since}", listed.len()),
            None => log::info!("Phase 1: Listed {} document(s)", listed.len()),
        }
        self.check_cancelled()?;

        // Phase 2: read. Incremental runs skip entries the ledger already
        // holds at the same timestamp.
        let to_read: Vec<SourceEntry> = match mode {
            SyncMode::Full => listed.clone(),
            SyncMode::Incremental => listed
                .iter()
                .filter(|e| {
                    snapshot
                        .ledger
                        .get(&e.id)
                        .map_or(true, |prev| prev.modified != e.modified)
                })
                .cloned()
                .collect(),
        };
        let (read, skipped) = self.read_documents(&pool, "read", to_read)?;
        let skipped_ids: BTreeSet<DocId> = skipped.iter().map(|s| s.id.clone()).collect();
        report.documents_processed = read.len();
        report.documents_skipped.extend(skipped);

        // Phase 3: fingerprint
        let fingerprints = self.fingerprint_documents(&pool, &read)?;

        let mut updates: BTreeMap<DocId, LedgerEntry> = BTreeMap::new();
        let mut changed: BTreeSet<DocId> = BTreeSet::new();
        for (doc, fingerprint) in read.iter().zip(fingerprints) {
            let is_changed = snapshot.ledger.get(&doc.id).map_or(true, |prev| {
                prev.fingerprint.content_hash != fingerprint.content_hash
                    || prev.topic_key != doc.topic_key
                    || prev.collection != doc.collection
            });
            if is_changed {
                changed.insert(doc.id.clone());
            }
            updates.insert(
                doc.id.clone(),
                LedgerEntry {
                    collection: doc.collection.clone(),
                    topic_key: doc.topic_key.clone(),
                    modified: doc.modified,
                    fingerprint,
                },
            );
        }
        log::info!(
            "Phase 3: Fingerprinted {} document(s), {} changed",
            updates.len(),
            changed.len()
        );

        // The ledger as it will be after this run. Full runs keep the last
        // known entry of documents they could not read.
        let ledger_view: BTreeMap<DocId, LedgerEntry> = match mode {
            SyncMode::Full => {
                let mut ledger = updates.clone();
                for id in &skipped_ids {
                    if let Some(prev) = snapshot.ledger.get(id) {
                        ledger.insert(id.clone(), prev.clone());
                    }
                }
                ledger
            }
            SyncMode::Incremental => {
                let mut ledger = snapshot.ledger.clone();
                ledger.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
                ledger
            }
        };
        let watermark = watermark(&listed, &skipped_ids);

        // Phase 4: group
        let corpus: Vec<FingerprintedDoc> = ledger_view
            .iter()
            .filter(|(id, _)| mode == SyncMode::Incremental || !skipped_ids.contains(*id))
            .map(|(id, entry)| FingerprintedDoc {
                id: id.clone(),
                topic_key: entry.topic_key.clone(),
                fingerprint: entry.fingerprint.clone(),
            })
            .collect();
        self.phase_start("group", corpus.len());
        let metric = metric_for(&self.config.similarity, corpus.iter().map(|d| &d.fingerprint));
        let (groups, stats) = pool.install(|| self.grouper.group(&corpus, metric.as_ref()));
        self.phase_end("group");
        self.check_cancelled()?;

        let selected: Vec<&DuplicateGroup> = match mode {
            SyncMode::Full => groups.iter().collect(),
            SyncMode::Incremental => groups
                .iter()
                .filter(|g| g.members.iter().any(|m| changed.contains(m)))
                .collect(),
        };
        report.groups_found = selected.len();
        log::info!(
            "Phase 4: {} group(s) over {} document(s) ({} duplicate group(s)), {} to resolve",
            groups.len(),
            stats.total_documents,
            groups.iter().filter(|g| g.is_duplicate()).count(),
            selected.len()
        );

        // Members of touched groups that were not read this run.
        let mut documents: BTreeMap<DocId, Document> =
            read.into_iter().map(|d| (d.id.clone(), d)).collect();
        let missing: Vec<SourceEntry> = selected
            .iter()
            .flat_map(|g| g.members.iter())
            .filter(|id| !documents.contains_key(*id) && !skipped_ids.contains(*id))
            .filter_map(|id| {
                ledger_view.get(id).map(|entry| SourceEntry {
                    id: id.clone(),
                    collection: entry.collection.clone(),
                    topic_key: entry.topic_key.clone(),
                    modified: entry.modified,
                })
            })
            .collect();
        if !missing.is_empty() {
            log::debug!("Reading {} unchanged member(s) of touched groups", missing.len());
            let (fetched, skipped) = self.read_documents(&pool, "read", missing)?;
            report.documents_skipped.extend(skipped);
            documents.extend(fetched.into_iter().map(|d| (d.id.clone(), d)));
        }

        // Phase 5: score
        let to_score: Vec<&Document> = selected
            .iter()
            .flat_map(|g| g.members.iter())
            .filter_map(|id| documents.get(id))
            .collect();
        self.phase_start("score", to_score.len());
        let scores: BTreeMap<DocId, ScoreBreakdown> = pool
            .install(|| score_documents(&to_score, &self.rubric))
            .into_iter()
            .map(|s| (s.doc_id.clone(), s))
            .collect();
        self.phase_end("score");
        log::info!("Phase 5: Scored {} document(s)", scores.len());
        self.check_cancelled()?;

        // Phase 6: resolve and synthesize
        let outcomes = self.resolve_groups(&pool, &selected, &documents, &scores, &ledger_view)?;
        let mut synthesized: Vec<(CanonicalDocument, Vec<DocId>)> = Vec::new();
        for outcome in outcomes {
            match outcome {
                GroupOutcome::Synthesized { doc, members } => synthesized.push((doc, members)),
                GroupOutcome::Review(conflict) => report.flag(conflict),
                GroupOutcome::Unreadable => {}
            }
        }
        log::info!(
            "Phase 6: {} canonical document(s) synthesized, {} group(s) flagged",
            synthesized.len(),
            report.flagged.len()
        );

        // Phase 7: stage, verify, commit
        let ledger = match mode {
            SyncMode::Full => LedgerUpdate::Replace(ledger_view),
            SyncMode::Incremental => LedgerUpdate::Merge(updates),
        };
        let (staging, snapshot) = self.commit(mode, snapshot, &synthesized, ledger, watermark, report)?;

        for action in &staging.actions {
            report.decisions.record(*action);
        }
        for collision in staging.collisions {
            report.flag(collision);
        }

        if mode == SyncMode::Full {
            let committed: BTreeSet<&TopicKey> = snapshot
                .entries
                .keys()
                .chain(staging.changes.iter().map(|d| &d.topic_key))
                .collect();
            report.coverage_gaps = self
                .config
                .coverage
                .required_topics
                .iter()
                .filter(|topic| !committed.contains(&TopicKey::from_text(topic)))
                .cloned()
                .collect();
            if !report.coverage_gaps.is_empty() {
                log::info!(
                    "Coverage gaps: {} required topic(s) missing",
                    report.coverage_gaps.len()
                );
            }
        }
        Ok(())
    }

    /// Read `entries` in parallel. Failures become skipped documents.
    fn read_documents(
        &self,
        pool: &rayon::ThreadPool,
        phase: &str,
        entries: Vec<SourceEntry>,
    ) -> Result<(Vec<Document>, Vec<SkippedDocument>), SyncError> {
        self.phase_start(phase, entries.len());
        let results: Vec<Option<Result<Document, SkippedDocument>>> = pool.install(|| {
            entries
                .into_par_iter()
                .enumerate()
                .map(|(idx, entry)| {
                    if self.is_shutdown_requested() {
                        return None;
                    }
                    self.phase_progress(idx + 1, entry.id.as_str());
                    Some(match self.source.read(&entry.id) {
                        Ok(content) => Ok(Document::from_entry(entry, content)),
                        Err(e) => {
                            log::warn!("Skipping {}: {e}", entry.id);
                            Err(SkippedDocument {
                                id: entry.id,
                                reason: e.to_string(),
                            })
                        }
                    })
                })
                .collect()
        });
        self.phase_end(phase);

        let mut read = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Some(Ok(doc)) => read.push(doc),
                Some(Err(skip)) => skipped.push(skip),
                None => return Err(SyncError::Cancelled),
            }
        }
        log::info!("Phase 2: Read {} document(s), {} skipped", read.len(), skipped.len());
        Ok((read, skipped))
    }

    fn fingerprint_documents(
        &self,
        pool: &rayon::ThreadPool,
        docs: &[Document],
    ) -> Result<Vec<Fingerprint>, SyncError> {
        self.phase_start("fingerprint", docs.len());
        let fingerprints: Vec<Option<Fingerprint>> = pool.install(|| {
            docs.par_iter()
                .enumerate()
                .map(|(idx, doc)| {
                    if self.is_shutdown_requested() {
                        return None;
                    }
                    self.phase_progress(idx + 1, doc.id.as_str());
                    Some(self.fingerprinter.compute_fingerprint(doc))
                })
                .collect()
        });
        self.phase_end("fingerprint");
        fingerprints
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SyncError::Cancelled)
    }

    fn resolve_groups(
        &self,
        pool: &rayon::ThreadPool,
        groups: &[&DuplicateGroup],
        documents: &BTreeMap<DocId, Document>,
        scores: &BTreeMap<DocId, ScoreBreakdown>,
        ledger: &BTreeMap<DocId, LedgerEntry>,
    ) -> Result<Vec<GroupOutcome>, SyncError> {
        self.phase_start("resolve", groups.len());
        let outcomes: Vec<Option<GroupOutcome>> = pool.install(|| {
            groups
                .par_iter()
                .enumerate()
                .map(|(idx, group)| {
                    if self.is_shutdown_requested() {
                        return None;
                    }
                    self.phase_progress(idx + 1, &group.id);
                    Some(self.resolve_group(group, documents, scores, ledger))
                })
                .collect()
        });
        self.phase_end("resolve");
        outcomes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SyncError::Cancelled)
    }

    fn resolve_group(
        &self,
        group: &DuplicateGroup,
        documents: &BTreeMap<DocId, Document>,
        scores: &BTreeMap<DocId, ScoreBreakdown>,
        ledger: &BTreeMap<DocId, LedgerEntry>,
    ) -> GroupOutcome {
        let candidates: Vec<Candidate<'_>> = group
            .members
            .iter()
            .filter_map(|id| {
                let doc = documents.get(id)?;
                let score = scores.get(id)?;
                let token_count = ledger.get(id).map_or(0, |e| e.fingerprint.token_count);
                Some(Candidate {
                    doc,
                    score,
                    token_count,
                })
            })
            .collect();

        match self.resolver.decide(group, &candidates) {
            None => {
                log::warn!("Group {}: no member could be read", group.id);
                GroupOutcome::Unreadable
            }
            Some(Resolution::NeedsReview(conflict)) => GroupOutcome::Review(conflict),
            Some(Resolution::Resolved(decision)) => {
                let docs: BTreeMap<DocId, &Document> = candidates
                    .iter()
                    .map(|c| (c.doc.id.clone(), c.doc))
                    .collect();
                GroupOutcome::Synthesized {
                    doc: self.synthesizer.synthesize(&decision, &docs),
                    members: group.members.clone(),
                }
            }
        }
    }

    fn stage(
        &self,
        snapshot: &RegistrySnapshot,
        synthesized: &[(CanonicalDocument, Vec<DocId>)],
    ) -> Result<Staging, VerifyError> {
        let mut staged = StagedRegistry::new(snapshot, self.resolver.precedence());
        let mut actions = Vec::new();
        let mut collisions = Vec::new();
        for (doc, members) in synthesized {
            match staged.stage(doc.clone(), members) {
                Ok(_) => actions.push(doc.action),
                Err(conflict) => collisions.push(conflict),
            }
        }
        staged.verify()?;
        let unchanged = staged.unchanged_len();
        Ok(Staging {
            changes: staged.into_changes(),
            actions,
            collisions,
            unchanged,
        })
    }

    /// Stage against `snapshot` and commit, re-staging against a fresh
    /// snapshot when another writer got there first. Returns the staging
    /// that landed and the snapshot it was staged against.
    fn commit(
        &self,
        mode: SyncMode,
        mut snapshot: RegistrySnapshot,
        synthesized: &[(CanonicalDocument, Vec<DocId>)],
        ledger: LedgerUpdate,
        watermark: Option<DateTime<Utc>>,
        report: &mut RunReport,
    ) -> Result<(Staging, RegistrySnapshot), SyncError> {
        let retries = self.config.run.commit_retries;
        let mut attempt = 0u32;
        loop {
            self.check_cancelled()?;
            let mut staging = self.stage(&snapshot, synthesized)?;
            log::debug!(
                "Staged {} change(s), {} unchanged, {} collision(s) against version {}",
                staging.changes.len(),
                staging.unchanged,
                staging.collisions.len(),
                snapshot.version
            );

            let nothing_to_write = staging.changes.is_empty()
                && matches!(&ledger, LedgerUpdate::Merge(updates) if updates.is_empty());
            if mode == SyncMode::Incremental && nothing_to_write {
                log::info!("Phase 7: Nothing to commit");
                return Ok((staging, snapshot));
            }

            let committed_at = Utc::now();
            for doc in &mut staging.changes {
                doc.committed_run = Some(report.run_id.clone());
                doc.committed_at = Some(committed_at);
            }

            self.phase_start("commit", staging.changes.len());
            let batch = CommitBatch {
                base_version: snapshot.version,
                changes: staging.changes.clone(),
                ledger: ledger.clone(),
                watermark,
            };
            let result = self.store.commit(batch);
            self.phase_end("commit");

            match result {
                Ok(version) => {
                    log::info!(
                        "Phase 7: Committed {} canonical document(s) at version {version}",
                        staging.changes.len()
                    );
                    return Ok((staging, snapshot));
                }
                Err(StoreError::VersionConflict { expected, actual }) if attempt < retries => {
                    attempt += 1;
                    log::warn!(
                        "Registry moved from version {expected} to {actual}, re-staging (retry {attempt}/{retries})"
                    );
                    snapshot = self.store.snapshot()?;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    let attempts = attempt + 1;
                    for doc in &staging.changes {
                        report.flag(ConflictReport::new(
                            doc.group_id.clone(),
                            doc.topic_key.clone(),
                            ConflictKind::CommitConflict,
                            doc.sources().into_iter().collect(),
                            self.resolver.precedence(),
                            format!("registry changed concurrently on all {attempts} commit attempt(s)"),
                        ));
                    }
                    return Err(SyncError::CommitRetriesExhausted { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Watermark for the next incremental run: the newest listed timestamp,
/// held back to the oldest skipped document so it is listed again.
fn watermark(listed: &[SourceEntry], skipped: &BTreeSet<DocId>) -> Option<DateTime<Utc>> {
    let newest = listed
        .iter()
        .filter(|e| !skipped.contains(&e.id))
        .map(|e| e.modified)
        .max();
    let oldest_skipped = listed
        .iter()
        .filter(|e| skipped.contains(&e.id))
        .map(|e| e.modified)
        .min();
    match (newest, oldest_skipped) {
        (Some(newest), Some(skipped)) => Some(newest.min(skipped)),
        (newest, None) => newest,
        (None, skipped) => skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryCollection;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn entry(id: &str, day: u32) -> SourceEntry {
        SourceEntry {
            id: DocId::from(id),
            collection: "action".to_string(),
            topic_key: TopicKey::from(id),
            modified: at(day),
        }
    }

    fn doc(id: &str, content: &str, day: u32) -> Document {
        Document::new(id, "action", id, content, at(day))
    }

    fn engine(source: MemoryCollection) -> (SyncEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(Config::default(), Arc::new(source), store.clone()).unwrap();
        (engine, store)
    }

    #[test]
    fn test_watermark_newest_listed() {
        let listed = vec![entry("a", 1), entry("b", 5), entry("c", 3)];
        assert_eq!(watermark(&listed, &BTreeSet::new()), Some(at(5)));
        assert_eq!(watermark(&[], &BTreeSet::new()), None);
    }

    #[test]
    fn test_watermark_held_back_by_skipped() {
        let listed = vec![entry("a", 1), entry("b", 5), entry("c", 3)];
        let skipped: BTreeSet<DocId> = [DocId::from("c")].into_iter().collect();
        assert_eq!(watermark(&listed, &skipped), Some(at(3)));
    }

    #[test]
    fn test_worker_count_capped() {
        let mut config = Config::default();
        config.run.max_workers = 1;
        let engine = SyncEngine::new(
            config,
            Arc::new(MemoryCollection::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        assert_eq!(engine.worker_count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut config = Config::default();
        config.run.max_workers = 0;
        let result = SyncEngine::new(
            config,
            Arc::new(MemoryCollection::new()),
            Arc::new(MemoryStore::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_corpus_completes() {
        let (engine, store) = engine(MemoryCollection::new());
        let report = engine.run_sync(SyncMode::Full);
        assert!(report.is_completed());
        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.groups_found, 0);
        assert_eq!(store.runs().unwrap().len(), 1);
    }

    #[test]
    fn test_single_document_kept() {
        let source = MemoryCollection::new();
        source.insert(doc("reentrancy", "# Reentrancy\n\nGuard external calls.\n", 1));
        let (engine, store) = engine(source);

        let report = engine.run_sync(SyncMode::Full);
        assert!(report.is_completed());
        assert_eq!(report.decisions.keep_single, 1);
        let doc = store.get(&TopicKey::from("reentrancy")).unwrap().unwrap();
        assert_eq!(doc.attribution.primary.doc_id, DocId::from("reentrancy"));
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.committed_run.as_deref(), Some(report.run_id.as_str()));
    }

    #[test]
    fn test_cancelled_before_start_commits_nothing() {
        let source = MemoryCollection::new();
        source.insert(doc("a", "# A\n\nbody\n", 1));
        let (engine, store) = engine(source);
        let flag = Arc::new(AtomicBool::new(true));
        let engine = engine.with_shutdown_flag(flag);

        let report = engine.run_sync(SyncMode::Full);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(store.snapshot().unwrap().version, 0);
        assert_eq!(store.runs().unwrap()[0].status, RunStatus::Cancelled);
    }

    #[test]
    fn test_coverage_gaps_reported_on_full_runs() {
        let source = MemoryCollection::new();
        source.insert(doc("reentrancy", "# Reentrancy\n\nGuard external calls.\n", 1));
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.coverage.required_topics = vec!["Reentrancy".to_string(), "Oracle Manipulation".to_string()];
        let engine = SyncEngine::new(config, Arc::new(source), store).unwrap();

        let report = engine.run_sync(SyncMode::Full);
        assert_eq!(report.coverage_gaps, vec!["Oracle Manipulation".to_string()]);
    }
}
