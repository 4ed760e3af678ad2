//! Integration tests for configuration loading.
//!
//! These tests cover the full layering stack: defaults, TOML file parsing,
//! environment variable overrides, validation, and clap argument parsing.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use kbcanon::cli::{Cli, Commands};
use kbcanon::config::{CandidateStrategy, Config, ConfigError, MetricKind, Precedence};
use kbcanon::scoring::Rubric;
use kbcanon::sync::SyncMode;
use tempfile::tempdir;

// =============================================================================
// Helper Functions
// =============================================================================

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clear all KBCANON_* environment variables to avoid interference.
fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("KBCANON_") {
            std::env::remove_var(key);
        }
    }
}

fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

// =============================================================================
// Layering
// =============================================================================

#[test]
fn test_config_load_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let config = Config::load_from_path(None).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.similarity.probable, 0.70);
    assert_eq!(config.similarity.metric, MetricKind::MinHash);
    assert_eq!(config.resolution.keep_single_gap, 20.0);
    assert_eq!(config.run.commit_retries, 3);
}

#[test]
fn test_config_load_from_toml() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config(
        r#"
[similarity]
probable = 0.6
metric = "tfidf"
candidates = "all_pairs"

[scoring.criteria.authority]
vendor = 25
action = 20

[resolution]
precedence = "authority"

[[resolution.conflict_markers]]
subtopic = "unchecked-call"
affirm = ["low-level call return values can be ignored"]
deny = ["always check the return value of call"]

[coverage]
required_topics = ["Reentrancy", "Oracle Manipulation"]

[run]
max_workers = 2
"#,
    );

    let config = Config::load_from_path(Some(&path)).unwrap();
    assert_eq!(config.similarity.probable, 0.6);
    assert_eq!(config.similarity.likely, 0.90);
    assert_eq!(config.similarity.metric, MetricKind::TfIdf);
    assert_eq!(config.similarity.candidates, CandidateStrategy::AllPairs);
    assert_eq!(config.scoring.criteria["authority"]["vendor"], 25);
    assert!(config.scoring.criteria.contains_key("completeness"));
    assert_eq!(config.resolution.precedence, Precedence::Authority);
    assert_eq!(config.resolution.conflict_markers.len(), 1);
    assert_eq!(config.resolution.conflict_markers[0].subtopic, "unchecked-call");
    assert_eq!(config.coverage.required_topics.len(), 2);
    assert_eq!(config.run.max_workers, 2);
    assert_eq!(config.run.commit_retries, 3);
}

#[test]
fn test_config_env_overrides_file() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config("[similarity]\nprobable = 0.6\n");
    std::env::set_var("KBCANON_SIMILARITY__PROBABLE", "0.8");
    std::env::set_var("KBCANON_RUN__COMMIT_RETRIES", "7");

    let result = Config::load_from_path(Some(&path));
    clear_env();

    let config = result.unwrap();
    assert_eq!(config.similarity.probable, 0.8);
    assert_eq!(config.run.commit_retries, 7);
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let config = Config::load_from_path(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_save_toml_round_trip() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let mut config = Config::default();
    config.similarity.metric = MetricKind::TfIdf;
    config.coverage.required_topics = vec!["Flash Loans".to_string()];

    let (_dir, path) = write_config(&config.to_toml().unwrap());
    assert_eq!(Config::load_from_path(Some(&path)).unwrap(), config);
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_config_malformed_toml_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config("[similarity\nprobable = ");
    assert!(matches!(
        Config::load_from_path(Some(&path)),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_config_wrong_type_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config("[run]\nmax_workers = \"many\"\n");
    assert!(matches!(
        Config::load_from_path(Some(&path)),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_config_out_of_range_threshold_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config("[similarity]\nprobable = 1.5\n");
    let err = Config::load_from_path(Some(&path)).unwrap_err();
    match err {
        ConfigError::Invalid { field, .. } => assert_eq!(field, "similarity.probable"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_config_inverted_gaps_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) =
        write_config("[resolution]\nkeep_single_gap = 5.0\nmerge_all_gap = 10.0\n");
    let err = Config::load_from_path(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("resolution.keep_single_gap"));
}

#[test]
fn test_config_unknown_signal_rejected_by_rubric() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let (_dir, path) = write_config("[scoring.criteria.completeness]\nexamplez = 10\n");
    let config = Config::load_from_path(Some(&path)).unwrap();
    let err = Rubric::from_config(&config.scoring).unwrap_err();
    assert!(err.to_string().contains("examplez"));
}

// =============================================================================
// CLI Parsing
// =============================================================================

#[test]
fn test_cli_sync_arguments() {
    let cli = Cli::try_parse_from([
        "kbcanon",
        "-vv",
        "--config",
        "kb.toml",
        "sync",
        "-s",
        "action=kb/action",
        "--source",
        "research=kb/research",
        "--registry",
        "kb.db",
        "--mode",
        "full",
    ])
    .unwrap();

    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.config, Some(PathBuf::from("kb.toml")));
    match cli.command {
        Commands::Sync(args) => {
            assert_eq!(args.sources.len(), 2);
            assert_eq!(args.sources[1].0, "research");
            assert_eq!(args.registry, PathBuf::from("kb.db"));
            assert_eq!(args.mode, SyncMode::Full);
        }
        _ => panic!("expected sync command"),
    }
}

#[test]
fn test_cli_rejects_source_without_name() {
    assert!(Cli::try_parse_from(["kbcanon", "sync", "-s", "kb/action", "-r", "kb.db"]).is_err());
}
