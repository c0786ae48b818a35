#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Refresh phase, report, and scheduler statistics types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crime_updater_database_models::TableColor;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Where the refresh coordinator currently is in its cycle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshPhase {
    /// No cycle is running.
    #[default]
    Idle,
    /// Downloading and mapping source rows.
    Fetching,
    /// Bulk-loading the inactive table.
    Loading,
    /// Stamping the freshly loaded table as active.
    Promoting,
    /// The cycle failed; the previously active table is untouched.
    Failed,
}

/// Outcome of a successful refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Which table was loaded and promoted.
    pub color: TableColor,
    /// Name of the promoted table.
    pub table: String,
    /// Data rows downloaded across all sources (header rows excluded).
    pub rows_fetched: u64,
    /// Rows dropped because they did not have the expected shape.
    pub rows_discarded: u64,
    /// Rows written to the table.
    pub rows_loaded: u64,
    /// Timestamp recorded for the promoted table.
    pub promoted_at: DateTime<Utc>,
    /// Wall-clock time of the whole cycle.
    pub duration: Duration,
}

/// Counters kept by the scheduler over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Cycles started.
    pub started: u64,
    /// Cycles that promoted a table.
    pub succeeded: u64,
    /// Cycles that failed (including cancelled ones).
    pub failed: u64,
    /// Ticks dropped because the previous cycle was still running.
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_render_snake_case() {
        assert_eq!(RefreshPhase::default(), RefreshPhase::Idle);
        assert_eq!(RefreshPhase::Promoting.to_string(), "promoting");
        assert_eq!(RefreshPhase::Failed.as_ref(), "failed");
    }
}
