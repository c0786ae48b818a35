#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the crime updater.
//!
//! [`init_logger`] installs the process-wide `pretty_env_logger` backend in
//! either human-readable text or one-JSON-object-per-line form. `RUST_LOG`
//! is still honoured on top of the configured level, so a single module
//! can be turned up without touching the config file.

use std::io::Write as _;

use log::{LevelFilter, Record};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Output format of the process logger.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored, timestamped lines from `pretty_env_logger`.
    #[default]
    Text,
    /// One JSON object per line: `ts`, `level`, `target`, `msg`.
    Json,
}

/// Initializes the global logger at `level` in the given `format`.
///
/// Directives in `RUST_LOG` are applied after `level`, so they refine it.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logger(level: LevelFilter, format: LogFormat) {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(level).parse_env("RUST_LOG");

    if format == LogFormat::Json {
        builder.format(|buf, record| writeln!(buf, "{}", json_line(record)));
    }

    // Already set (e.g., in tests)
    builder.try_init().ok();
}

/// Renders one log record as a JSON object.
#[must_use]
pub fn json_line(record: &Record<'_>) -> serde_json::Value {
    serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "level": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use log::Level;

    use super::*;

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("TEXT").unwrap(), LogFormat::Text);
        assert!(LogFormat::from_str("yaml").is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn json_line_has_expected_fields() {
        let line = json_line(
            &Record::builder()
                .level(Level::Warn)
                .target("crime_updater_ingest::coordinator")
                .args(format_args!("discarded {} rows", 2))
                .build(),
        );

        assert_eq!(line["level"], "WARN");
        assert_eq!(line["target"], "crime_updater_ingest::coordinator");
        assert_eq!(line["msg"], "discarded 2 rows");
        assert!(line["ts"].as_str().is_some_and(|ts| ts.contains('T')));
    }
}
