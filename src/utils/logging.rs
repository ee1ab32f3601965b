//! Tracing subscriber setup.
//!
//! Levels used across the crate:
//! - ERROR: session faults (framing, transport, handshake violations)
//! - WARN: isolated failures (handler errors, request timeouts, stale responses)
//! - INFO: session lifecycle (ready, closed)
//! - DEBUG: state transitions, frames sent and received

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()))
}

/// Install a global subscriber built from `config`.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already installed or the log file can't be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = filter_for(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = Arc::new(file);
            if config.json_format {
                builder.json().with_writer(writer).try_init()
            } else {
                builder.with_ansi(false).with_writer(writer).try_init()
            }
        }
        _ if config.json_format => builder.json().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))
}

/// Install a test-friendly subscriber. Safe to call more than once.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
