//! Progress reporting for sync runs.
//!
//! The engine reports each parallel phase through [`ProgressCallback`].
//! [`Progress`] renders them as terminal progress bars; in quiet mode it
//! renders nothing.

use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress callback for run phases.
///
/// Implement this trait to receive progress updates during a run. Phases
/// are `read`, `fingerprint`, `group`, `score`, `resolve` and `commit`.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase
    /// * `total` - Total number of items to process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Current item number (1-based)
    /// * `item` - Document id or group id being processed
    fn on_progress(&self, current: usize, item: &str);

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
///
/// One bar is active at a time; phases run one after another.
pub struct Progress {
    multi: MultiProgress,
    active: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Examples
    ///
    /// ```
    /// use kbcanon::progress::Progress;
    ///
    /// let progress = Progress::new(true);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            active: Mutex::new(None),
            quiet,
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(Self::bar_style());
        pb.set_message(phase_label(phase).to_string());
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn on_progress(&self, current: usize, item: &str) {
        if self.quiet {
            return;
        }
        if let Ok(active) = self.active.lock() {
            if let Some(ref pb) = *active {
                pb.set_position(current as u64);
                pb.set_message(truncate_item(item, 30));
            }
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        if let Ok(mut active) = self.active.lock() {
            if let Some(pb) = active.take() {
                pb.finish_with_message(format!("{} complete", phase_label(phase)));
            }
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        if let Ok(active) = self.active.lock() {
            if let Some(ref pb) = *active {
                pb.set_message(message.to_string());
            }
        }
    }
}

fn phase_label(phase: &str) -> &str {
    match phase {
        "read" => "Reading",
        "fingerprint" => "Fingerprinting",
        "group" => "Grouping",
        "score" => "Scoring",
        "resolve" => "Resolving",
        "commit" => "Committing",
        other => other,
    }
}

/// Shorten an item id for display, keeping its tail.
fn truncate_item(item: &str, max_len: usize) -> String {
    let count = item.chars().count();
    if count <= max_len {
        return item.to_string();
    }
    let tail: String = item.chars().skip(count - (max_len - 3)).collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_item() {
        assert_eq!(truncate_item("short", 30), "short");
        let long = "a".repeat(40) + "tail";
        let truncated = truncate_item(&long, 10);
        assert_eq!(truncated.chars().count(), 10);
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with("tail"));
    }

    #[test]
    fn test_truncate_item_multibyte() {
        let item = "é".repeat(20);
        assert_eq!(truncate_item(&item, 8).chars().count(), 8);
    }

    #[test]
    fn test_quiet_progress_is_silent() {
        let progress = Progress::new(true);
        progress.on_phase_start("read", 10);
        progress.on_progress(1, "doc");
        progress.on_phase_end("read");
        assert!(progress.active.lock().unwrap().is_none());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(phase_label("fingerprint"), "Fingerprinting");
        assert_eq!(phase_label("custom"), "custom");
    }
}
