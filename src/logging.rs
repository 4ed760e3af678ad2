//! Logging setup.
//!
//! All diagnostics go to stderr through the `log` facade and `env_logger`;
//! stdout is reserved for the JSON run report. The level comes from, in
//! priority order:
//!
//! 1. `RUST_LOG` (full `env_logger` filter syntax)
//! 2. `--quiet` (errors only) or `-v`/`-vv` (debug/trace for this crate)
//! 3. Info for this crate, warnings for dependencies
//!
//! ```rust,no_run
//! use kbcanon::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("Phase 1: reading documents");
//! ```

use std::env;
use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Filter applied to dependencies unless `RUST_LOG` says otherwise.
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::Warn;

/// Initialize logging from CLI verbosity flags.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = env::var("RUST_LOG").is_ok();
    let level = determine_level(verbose, quiet);

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder
            .filter_level(DEPENDENCY_LEVEL.min(level))
            .filter_module(env!("CARGO_CRATE_NAME"), level);
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return;
    }
    if from_env {
        log::debug!("Logging configured from RUST_LOG");
    } else {
        log::debug!("Logging initialized at level {}", level_name(level));
    }
}

/// Level for this crate's own messages.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Trace output names the emitting thread so rayon workers can be told apart.
fn configure_format(builder: &mut Builder, verbose: u8) {
    builder.format(move |buf, record| {
        let level = record.level();
        let style = buf.default_level_style(level);
        let target = record.module_path().unwrap_or("unknown");

        match verbose {
            0 => writeln!(buf, "{style}{level:<5}{style:#} {}", record.args()),
            1 => writeln!(
                buf,
                "{} {style}{level:<5}{style:#} [{target}] {}",
                buf.timestamp_millis(),
                record.args()
            ),
            _ => {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "{} {style}{level:<5}{style:#} [{target}] ({}) {}",
                    buf.timestamp_millis(),
                    thread.name().unwrap_or("worker"),
                    record.args()
                )
            }
        }
    });
}

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_level_default() {
        assert_eq!(determine_level(0, false), LevelFilter::Info);
    }

    #[test]
    fn test_determine_level_verbose() {
        assert_eq!(determine_level(1, false), LevelFilter::Debug);
        assert_eq!(determine_level(2, false), LevelFilter::Trace);
        assert_eq!(determine_level(5, false), LevelFilter::Trace);
    }

    #[test]
    fn test_quiet_overrides_verbose() {
        assert_eq!(determine_level(0, true), LevelFilter::Error);
        assert_eq!(determine_level(2, true), LevelFilter::Error);
    }

    #[test]
    fn test_dependencies_never_louder_than_crate() {
        assert_eq!(DEPENDENCY_LEVEL.min(LevelFilter::Error), LevelFilter::Error);
        assert_eq!(DEPENDENCY_LEVEL.min(LevelFilter::Trace), LevelFilter::Warn);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging(0, true);
        init_logging(2, false);
        assert_eq!(level_name(LevelFilter::Warn), "warn");
    }
}
