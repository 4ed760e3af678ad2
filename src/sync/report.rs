//! Run reports.
//!
//! A [`RunReport`] is produced for every run, including aborted and
//! cancelled ones, and is recorded in the store. It is the structured record
//! consumed by reporting and notification tooling.
//!
//! Reports count what a run *decided*, not what it wrote: a re-run over an
//! unchanged corpus yields the same report (timestamps and run id aside).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolve::{ConflictReport, DecisionAction};
use crate::source::DocId;

/// Run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only documents changed since the last run, and the groups they touch.
    #[default]
    Incremental,
    /// The whole corpus, plus coverage gap analysis.
    Full,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Changes (if any) were committed.
    Completed,
    /// A run-level error stopped the run; nothing was committed.
    Aborted { reason: String },
    /// Shutdown was requested; nothing was committed.
    Cancelled,
}

/// A source document that could not be read this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub id: DocId,
    pub reason: String,
}

/// Decision counts by action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub keep_single: usize,
    pub keep_primary_add_parts: usize,
    pub merge_all: usize,
    pub needs_review: usize,
}

impl DecisionCounts {
    pub fn record(&mut self, action: DecisionAction) {
        match action {
            DecisionAction::KeepSingle => self.keep_single += 1,
            DecisionAction::KeepPrimaryAddParts => self.keep_primary_add_parts += 1,
            DecisionAction::MergeAll => self.merge_all += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.keep_single + self.keep_primary_add_parts + self.merge_all + self.needs_review
    }
}

/// Structured record of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: SyncMode,
    #[serde(flatten)]
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Documents read and fingerprinted this run
    pub documents_processed: usize,
    pub documents_skipped: Vec<SkippedDocument>,
    /// Groups resolved this run (touched groups in incremental mode)
    pub groups_found: usize,
    pub decisions: DecisionCounts,
    /// Groups escalated for human review
    pub flagged: Vec<ConflictReport>,
    /// Required topics with no canonical document (full runs only)
    pub coverage_gaps: Vec<String>,
}

impl RunReport {
    /// An empty report for a run starting now.
    #[must_use]
    pub fn begin(mode: SyncMode) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: run_id(started_at),
            mode,
            status: RunStatus::Completed,
            started_at,
            finished_at: started_at,
            documents_processed: 0,
            documents_skipped: Vec::new(),
            groups_found: 0,
            decisions: DecisionCounts::default(),
            flagged: Vec::new(),
            coverage_gaps: Vec::new(),
        }
    }

    /// Record an escalation.
    pub fn flag(&mut self, report: ConflictReport) {
        self.decisions.needs_review += 1;
        self.flagged.push(report);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Serialize to JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

fn run_id(started_at: DateTime<Utc>) -> String {
    let nanos = started_at.timestamp_nanos_opt().unwrap_or_default();
    let salt = blake3::hash(&nanos.to_le_bytes());
    format!(
        "{}-{}",
        started_at.format("%Y%m%dT%H%M%S"),
        &salt.to_hex()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut counts = DecisionCounts::default();
        counts.record(DecisionAction::KeepSingle);
        counts.record(DecisionAction::MergeAll);
        counts.needs_review += 1;
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.keep_single, 1);
    }

    #[test]
    fn test_json_shape() {
        let mut report = RunReport::begin(SyncMode::Full);
        report.status = RunStatus::Aborted {
            reason: "boom".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&report.to_json(false).unwrap()).unwrap();
        assert_eq!(value["mode"], "full");
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["reason"], "boom");
        assert_eq!(value["decisions"]["merge_all"], 0);

        let back: RunReport = serde_json::from_str(&report.to_json(true).unwrap()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_run_ids_are_timestamped() {
        let report = RunReport::begin(SyncMode::Incremental);
        assert_eq!(report.run_id.len(), "20240101T000000-".len() + 8);
        assert!(report.is_completed());
    }
}
