//! Command-line interface definitions.
//!
//! ```bash
//! # Incremental run over two source tiers
//! kbcanon sync --source action=./kb/action --source research=./kb/research --registry kb.db
//!
//! # Full run with gap analysis, pretty JSON report
//! kbcanon sync --source action=./kb/action --registry kb.db --mode full --pretty
//!
//! # Effective configuration
//! kbcanon config
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::sync::SyncMode;

/// Knowledge-base deduplication and canonical synthesis.
#[derive(Debug, Parser)]
#[command(name = "kbcanon")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run deduplication and synthesis into the registry
    Sync(SyncArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
    /// Print recorded run reports
    Runs(RunsArgs),
}

/// Arguments for the sync subcommand.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Source collection as NAME=DIR (repeatable; NAME is the authority tier)
    #[arg(short, long = "source", value_name = "NAME=DIR", required = true, value_parser = parse_source)]
    pub sources: Vec<(String, PathBuf)>,

    /// Registry database file
    #[arg(short, long, value_name = "FILE")]
    pub registry: PathBuf,

    /// Run mode
    #[arg(short, long, value_enum, default_value_t = SyncMode::Incremental)]
    pub mode: SyncMode,

    /// Pretty-print the JSON report
    #[arg(long)]
    pub pretty: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the config subcommand.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Print the default config file location instead
    #[arg(long)]
    pub path: bool,
}

/// Arguments for the runs subcommand.
#[derive(Debug, Args)]
pub struct RunsArgs {
    /// Registry database file
    #[arg(short, long, value_name = "FILE")]
    pub registry: PathBuf,

    /// Only the most recent N runs
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,
}

/// Parse `NAME=DIR`.
fn parse_source(s: &str) -> Result<(String, PathBuf), String> {
    crate::source::FsCollection::parse_root(s)
        .ok_or_else(|| format!("expected NAME=DIR, got '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_sync() {
        let cli = Cli::try_parse_from([
            "kbcanon",
            "sync",
            "--source",
            "action=/kb/action",
            "--source",
            "research=/kb/research",
            "--registry",
            "kb.db",
        ])
        .unwrap();

        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(
                    args.sources,
                    vec![
                        ("action".to_string(), PathBuf::from("/kb/action")),
                        ("research".to_string(), PathBuf::from("/kb/research")),
                    ]
                );
                assert_eq!(args.registry, PathBuf::from("kb.db"));
                assert_eq!(args.mode, SyncMode::Incremental);
                assert!(!args.pretty);
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_cli_parse_full_mode_and_globals() {
        let cli = Cli::try_parse_from([
            "kbcanon",
            "-vv",
            "--json-errors",
            "sync",
            "-s",
            "action=/kb",
            "-r",
            "kb.db",
            "--mode",
            "full",
            "--pretty",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json_errors);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.mode, SyncMode::Full);
                assert!(args.pretty);
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_cli_rejects_malformed_source() {
        let result = Cli::try_parse_from(["kbcanon", "sync", "--source", "nodir", "--registry", "kb.db"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_a_source() {
        let result = Cli::try_parse_from(["kbcanon", "sync", "--registry", "kb.db"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["kbcanon", "-q", "-v", "config"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_runs() {
        let cli = Cli::try_parse_from(["kbcanon", "runs", "--registry", "kb.db", "--limit", "5"]).unwrap();
        match cli.command {
            Commands::Runs(args) => assert_eq!(args.limit, Some(5)),
            _ => panic!("Expected Runs command"),
        }
    }
}
