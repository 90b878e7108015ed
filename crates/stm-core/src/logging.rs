//! Tracing integration for structured logging.
//!
//! The transport logs to `tracing` targets under `stm_core` and
//! `stm_client`; this module wires up a subscriber for hosts that do
//! not bring their own.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Initialize the logging system.
///
/// `verbosity` maps 0=error, 1=warn, 2=info, 3=debug, 4+=trace; the
/// `RUST_LOG` environment variable overrides it. Output goes to
/// stderr, or appends to `log_file` when given (ANSI disabled there).
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(true);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Text => base.boxed(),
        LogFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(level_filter(verbosity))
        .try_init()
        .map_err(|e| Error::Io(io::Error::other(e.to_string())))
}

/// Level filter for our crates, unless `RUST_LOG` says otherwise.
fn level_filter(verbosity: u8) -> EnvFilter {
    let level = level_name(verbosity);
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stm_core={level},stm_client={level}")))
}

fn level_name(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (a subscriber may already be installed).
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_name(0), "error");
        assert_eq!(level_name(1), "warn");
        assert_eq!(level_name(2), "info");
        assert_eq!(level_name(3), "debug");
        assert_eq!(level_name(4), "trace");
        assert_eq!(level_name(9), "trace");
    }

    #[test]
    fn init_is_idempotent_enough_for_tests() {
        init_test_logging();
        init_test_logging();
    }
}
