//! Result rendering for the command line
//!
//! Text output keeps the classic layout (one `label value` line per register
//! between a heading and a trailer); JSON output is meant for scripts.

use crate::core::meter::{PollReport, Register, RegisterTable};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Text,
    /// JSON object
    Json,
}

/// Width of the label column
pub const LABEL_WIDTH: usize = 40;

/// Plain-text rendering
pub fn format_text(values: &RegisterTable) -> String {
    let mut out = String::from("\nSDM220 Data:\n\n");
    for (register, value) in values.iter() {
        out.push_str(&format!("{:<width$} {:.2}\n", register.label(), value, width = LABEL_WIDTH));
    }
    out.push_str("\nAll done.\n");
    out
}

/// JSON rendering
///
/// Registers that failed in `report` are listed under `"failed"`; their
/// values are still present and hold whatever the table had.
pub fn format_json(
    values: &RegisterTable,
    slave_address: u8,
    timestamp: DateTime<Utc>,
    report: Option<&PollReport>,
) -> serde_json::Value {
    let readings: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(register, value)| (register.key().to_string(), serde_json::json!(value)))
        .collect();

    let failed: Vec<&str> = report
        .map(|r| {
            r.failures
                .iter()
                .filter_map(|e| e.register())
                .map(Register::key)
                .collect()
        })
        .unwrap_or_default();

    serde_json::json!({
        "slave_address": slave_address,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        "readings": readings,
        "failed": failed,
    })
}

/// Render values in `format`
pub fn format_output(
    values: &RegisterTable,
    slave_address: u8,
    report: Option<&PollReport>,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => format_text(values),
        OutputFormat::Json => {
            let json = format_json(values, slave_address, Utc::now(), report);
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        }
    }
}
