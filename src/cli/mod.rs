//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of readings
//! - Logging setup

pub mod exit_codes;
pub mod logging;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use logging::{init_tracing, level_directive};
pub use output::{format_json, format_output, format_text, OutputFormat};
