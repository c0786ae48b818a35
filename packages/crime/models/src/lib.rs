#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Normalized crime record type shared by the updater pipeline.
//!
//! The City of Portland publishes one CSV per year with a fixed 14-column
//! layout. Every row that passes the record mapper becomes a
//! [`CrimeRecord`]; the column layout itself is described by [`Column`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumCount as _;
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter};

/// Positional columns of a source CSV row, in file order.
///
/// The discriminant of each variant is its zero-based index in the row.
/// Variant names match the header names published by the city.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    AsRefStr,
    EnumCount,
    EnumIter,
)]
pub enum Column {
    Address = 0,
    CaseNumber = 1,
    CrimeAgainst = 2,
    Neighborhood = 3,
    OccurDate = 4,
    OccurTime = 5,
    OffenseCategory = 6,
    OffenseType = 7,
    OpenDataLat = 8,
    OpenDataLon = 9,
    OpenDataX = 10,
    OpenDataY = 11,
    ReportDate = 12,
    OffenseCount = 13,
}

impl Column {
    /// Zero-based position of this column within a row.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Number of columns every well-formed source row must have.
pub const EXPECTED_COLUMN_COUNT: usize = Column::COUNT;

/// Placeholder timestamp (`1900-01-01T00:00:00Z`) substituted when a date or
/// date-time field cannot be parsed.
#[must_use]
pub fn sentinel_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MIN_UTC, |naive| naive.and_utc())
}

/// A single crime observation normalized from one source row.
///
/// Optional numeric fields are `None` when the source cell was empty or not
/// a number; they are never defaulted to zero. The all-default value (see
/// [`CrimeRecord::is_zero`]) marks a row that could not be mapped at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeRecord {
    /// Block-level address of the incident.
    pub address: String,
    /// Police case number. Not unique across rows.
    pub case_number: String,
    /// Victim class (`Person`, `Property` or `Society`).
    pub crime_against: String,
    /// Neighborhood name as published by the city.
    pub neighborhood: String,
    /// When the offense occurred, built from the date and `HHMM` time columns.
    pub occur_date_time: DateTime<Utc>,
    /// Broad offense category.
    pub offense_category: String,
    /// Specific offense type.
    pub offense_type: String,
    /// Latitude (WGS84).
    pub open_data_lat: Option<f64>,
    /// Longitude (WGS84).
    pub open_data_lon: Option<f64>,
    /// State-plane X coordinate.
    pub open_data_x: Option<f64>,
    /// State-plane Y coordinate.
    pub open_data_y: Option<f64>,
    /// When the offense was reported (date only, midnight UTC).
    pub report_date: DateTime<Utc>,
    /// Number of offenses recorded on the row.
    pub offense_count: Option<i32>,
}

impl CrimeRecord {
    /// Returns `true` for the zero-valued record produced from a row with
    /// the wrong shape.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator as _;

    #[test]
    fn column_discriminants_are_contiguous() {
        for (i, column) in Column::iter().enumerate() {
            assert_eq!(column.index(), i, "{column} out of order");
        }
        assert_eq!(EXPECTED_COLUMN_COUNT, 14);
    }

    #[test]
    fn column_names_match_headers() {
        assert_eq!(Column::OpenDataX.as_ref(), "OpenDataX");
        assert_eq!(Column::OccurTime.to_string(), "OccurTime");
    }

    #[test]
    fn sentinel_is_start_of_1900() {
        assert_eq!(sentinel_timestamp().to_rfc3339(), "1900-01-01T00:00:00+00:00");
    }

    #[test]
    fn default_record_is_zero() {
        assert!(CrimeRecord::default().is_zero());

        let record = CrimeRecord {
            case_number: "24-000001".to_string(),
            ..CrimeRecord::default()
        };
        assert!(!record.is_zero());
    }
}
