//! Tracing subscriber setup for the binary
//!
//! Logs go to stderr so stdout stays clean for readings. `RUST_LOG`, when
//! set, overrides the level chosen here.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Error returned when a global subscriber is already installed
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Effective filter directive from the command-line flags
pub fn level_directive(config: &LoggingConfig, verbose: u8, quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }
    match verbose {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber
pub fn init_tracing(directive: &str, json: bool) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
