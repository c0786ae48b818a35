//! Field parsers for the city's CSV format.
//!
//! These are strict: they report failure instead of guessing. The record
//! mapper decides what to substitute and what to log.

use chrono::{DateTime, NaiveDate, NaiveDateTime, ParseError, Utc};

/// Format of date-only cells (`MM/DD/YYYY`).
pub const DATE_ONLY_FORMAT: &str = "%m/%d/%Y";

/// Format of a date cell joined to an `HHMM` time cell by a single space.
pub const DATE_TIME_FORMAT: &str = "%m/%d/%Y %H%M";

/// A date or time cell that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum DateParseError {
    /// The date cell is not zero-padded `MM/DD/YYYY`.
    #[error("expected MM/DD/YYYY, got {0:?}")]
    DateShape(String),

    /// The time cell is not four digits `HHMM`.
    #[error("expected HHMM, got {0:?}")]
    TimeShape(String),

    /// The cell has the right shape but is not a real date or time.
    #[error(transparent)]
    OutOfRange(#[from] ParseError),
}

/// Parses a `MM/DD/YYYY` date as midnight UTC.
///
/// # Errors
///
/// Returns [`DateParseError`] if `date` is not exactly ten characters of
/// zero-padded `MM/DD/YYYY` or names a day that does not exist.
pub fn parse_date(date: &str) -> Result<DateTime<Utc>, DateParseError> {
    check_date_shape(date)?;
    let day = NaiveDate::parse_from_str(date, DATE_ONLY_FORMAT)?;
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Parses a `MM/DD/YYYY` date plus a 24-hour `HHMM` time as UTC.
///
/// # Errors
///
/// Returns [`DateParseError`] if either cell has the wrong shape or the
/// combined value is not a real date and time.
pub fn parse_date_time(date: &str, time: &str) -> Result<DateTime<Utc>, DateParseError> {
    check_date_shape(date)?;
    if time.len() != 4 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DateParseError::TimeShape(time.to_string()));
    }
    let combined = format!("{date} {time}");
    Ok(NaiveDateTime::parse_from_str(&combined, DATE_TIME_FORMAT)?.and_utc())
}

/// chrono accepts unpadded fields, short years and leading whitespace, so
/// the layout is checked byte by byte first.
fn check_date_shape(date: &str) -> Result<(), DateParseError> {
    let bytes = date.as_bytes();
    let ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            2 | 5 => *b == b'/',
            _ => b.is_ascii_digit(),
        });
    if ok {
        Ok(())
    } else {
        Err(DateParseError::DateShape(date.to_string()))
    }
}

/// Outcome of parsing an optional numeric cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric<T> {
    /// The cell was empty.
    Empty,
    /// The cell held something that is not a usable number.
    Invalid,
    /// The cell held a number.
    Value(T),
}

impl<T> Numeric<T> {
    /// Collapses the outcome into "present or absent".
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Empty | Self::Invalid => None,
        }
    }
}

/// Parses an optional floating point cell. Non-finite values are invalid.
#[must_use]
pub fn parse_f64(s: &str) -> Numeric<f64> {
    if s.is_empty() {
        return Numeric::Empty;
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Numeric::Value(v),
        _ => Numeric::Invalid,
    }
}

/// Parses an optional integer cell.
#[must_use]
pub fn parse_i32(s: &str) -> Numeric<i32> {
    if s.is_empty() {
        return Numeric::Empty;
    }
    s.parse::<i32>().map_or(Numeric::Invalid, Numeric::Value)
}
