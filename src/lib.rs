//! kbcanon - knowledge-base deduplication and canonical synthesis
//!
//! Fingerprints documents from one or more source collections, groups
//! near-duplicates, scores them against a configurable rubric, resolves each
//! group to a merge decision (or escalates it for review), and commits one
//! attributed canonical document per topic to a registry.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kbcanon::config::Config;
//! use kbcanon::source::FsCollection;
//! use kbcanon::store::SqliteStore;
//! use kbcanon::sync::{SyncEngine, SyncMode};
//!
//! let source = FsCollection::new().with_root("action", "kb/action");
//! let store = SqliteStore::open("kb.db".as_ref()).expect("registry");
//! let engine = SyncEngine::new(Config::default(), Arc::new(source), Arc::new(store))
//!     .expect("valid config");
//! let report = engine.run_sync(SyncMode::Full);
//! println!("{}", report.to_json(true).expect("serializable"));
//! ```

pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod progress;
pub mod resolve;
pub mod scoring;
pub mod signal;
pub mod source;
pub mod store;
pub mod sync;
pub mod synthesis;

use std::sync::Arc;

use anyhow::Context;

use cli::{Cli, Commands, ConfigArgs, RunsArgs, SyncArgs};
use config::Config;
use error::ExitCode;
use progress::Progress;
use source::FsCollection;
use store::{CanonicalStore, SqliteStore};
use sync::SyncEngine;

/// Run the command described by `cli`.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = Config::load_from_path(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Sync(args) => run_sync(config, args, cli.quiet),
        Commands::Config(args) => show_config(&config, &args),
        Commands::Runs(args) => show_runs(&args),
    }
}

fn run_sync(config: Config, args: SyncArgs, quiet: bool) -> anyhow::Result<ExitCode> {
    let handler = signal::install_handler().context("Failed to install signal handler")?;

    let source = args
        .sources
        .iter()
        .fold(FsCollection::new(), |source, (name, root)| {
            source.with_root(name.clone(), root.clone())
        });
    let store = SqliteStore::open(&args.registry)
        .with_context(|| format!("Failed to open registry {}", args.registry.display()))?;

    let mut engine = SyncEngine::new(config, Arc::new(source), Arc::new(store))
        .context("Invalid configuration")?
        .with_shutdown_handler(&handler);
    if !quiet && !args.no_progress {
        engine = engine.with_progress_callback(Arc::new(Progress::new(false)));
    }

    let report = engine.run_sync(args.mode);
    println!("{}", report.to_json(args.pretty)?);
    Ok(ExitCode::for_report(&report))
}

fn show_config(config: &Config, args: &ConfigArgs) -> anyhow::Result<ExitCode> {
    if args.path {
        println!("{}", Config::config_path()?.display());
    } else {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
    }
    Ok(ExitCode::Success)
}

fn show_runs(args: &RunsArgs) -> anyhow::Result<ExitCode> {
    let store = SqliteStore::open(&args.registry)
        .with_context(|| format!("Failed to open registry {}", args.registry.display()))?;
    let mut runs = store.runs()?;
    if let Some(limit) = args.limit {
        let skip = runs.len().saturating_sub(limit);
        runs.drain(..skip);
    }
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(ExitCode::Success)
}
