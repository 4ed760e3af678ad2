//! Structured error handling and exit codes.

use serde::Serialize;

use crate::sync::{RunReport, RunStatus};

/// Process exit codes.
///
/// - 0: Run completed, nothing needs review
/// - 1: General error (bad configuration, unreachable registry, aborted run)
/// - 2: Run completed, but some groups were flagged for review
/// - 3: Run completed, but some documents were skipped
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NeedsReview = 2,
    PartialSuccess = 3,
    Interrupted = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "KB000",
            Self::GeneralError => "KB001",
            Self::NeedsReview => "KB002",
            Self::PartialSuccess => "KB003",
            Self::Interrupted => "KB130",
        }
    }

    /// Exit code for a finished run. Skipped documents outrank flagged groups.
    #[must_use]
    pub fn for_report(report: &RunReport) -> Self {
        match report.status {
            RunStatus::Cancelled => Self::Interrupted,
            RunStatus::Aborted { .. } => Self::GeneralError,
            RunStatus::Completed if !report.documents_skipped.is_empty() => Self::PartialSuccess,
            RunStatus::Completed if !report.flagged.is_empty() => Self::NeedsReview,
            RunStatus::Completed => Self::Success,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "KB001")
    pub code: String,
    pub exit_code: i32,
    pub message: String,
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
