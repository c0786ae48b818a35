//! Maps raw CSV rows to [`CrimeRecord`]s.
//!
//! Mapping never fails. A row with the wrong number of columns becomes the
//! zero-valued record (one error logged); unparseable dates become the
//! sentinel timestamp (one error logged per field); unparseable optional
//! numbers become `None`.

use chrono::{DateTime, Utc};
use crime_updater_crime_models::{Column, CrimeRecord, EXPECTED_COLUMN_COUNT, sentinel_timestamp};
use log::{Level, Log};

use crate::parsing::{self, Numeric};
use crate::sink::emit;

const TARGET: &str = module_path!();

/// Converts one raw row into a [`CrimeRecord`], reporting problems to
/// `sink`.
///
/// Required string columns are copied verbatim.
#[must_use]
pub fn map_row<S: AsRef<str>>(row: &[S], sink: &dyn Log) -> CrimeRecord {
    if row.len() != EXPECTED_COLUMN_COUNT {
        emit(
            sink,
            Level::Error,
            TARGET,
            format_args!(
                "bad data format - expected {EXPECTED_COLUMN_COUNT} columns, row length={}",
                row.len()
            ),
        );
        return CrimeRecord::default();
    }

    let cell = |column: Column| row[column.index()].as_ref();

    CrimeRecord {
        address: cell(Column::Address).to_owned(),
        case_number: cell(Column::CaseNumber).to_owned(),
        crime_against: cell(Column::CrimeAgainst).to_owned(),
        neighborhood: cell(Column::Neighborhood).to_owned(),
        occur_date_time: date_time_or_sentinel(
            cell(Column::OccurDate),
            cell(Column::OccurTime),
            sink,
        ),
        offense_category: cell(Column::OffenseCategory).to_owned(),
        offense_type: cell(Column::OffenseType).to_owned(),
        open_data_lat: optional_f64(Column::OpenDataLat, cell(Column::OpenDataLat), sink),
        open_data_lon: optional_f64(Column::OpenDataLon, cell(Column::OpenDataLon), sink),
        open_data_x: optional_f64(Column::OpenDataX, cell(Column::OpenDataX), sink),
        open_data_y: optional_f64(Column::OpenDataY, cell(Column::OpenDataY), sink),
        report_date: date_or_sentinel(cell(Column::ReportDate), sink),
        offense_count: optional_i32(Column::OffenseCount, cell(Column::OffenseCount), sink),
    }
}

fn date_or_sentinel(date: &str, sink: &dyn Log) -> DateTime<Utc> {
    parsing::parse_date(date).unwrap_or_else(|e| {
        emit(
            sink,
            Level::Error,
            TARGET,
            format_args!("failed to parse date; using 1900-01-01 date={date:?} error={e}"),
        );
        sentinel_timestamp()
    })
}

fn date_time_or_sentinel(date: &str, time: &str, sink: &dyn Log) -> DateTime<Utc> {
    parsing::parse_date_time(date, time).unwrap_or_else(|e| {
        emit(
            sink,
            Level::Error,
            TARGET,
            format_args!(
                "failed to parse date and time; using 1900-01-01 00:00 date={date:?} time={time:?} error={e}"
            ),
        );
        sentinel_timestamp()
    })
}

fn optional_f64(column: Column, raw: &str, sink: &dyn Log) -> Option<f64> {
    let parsed = parsing::parse_f64(raw);
    if parsed == Numeric::Invalid {
        log_invalid_number(column, raw, sink);
    }
    parsed.into_option()
}

fn optional_i32(column: Column, raw: &str, sink: &dyn Log) -> Option<i32> {
    let parsed = parsing::parse_i32(raw);
    if parsed == Numeric::Invalid {
        log_invalid_number(column, raw, sink);
    }
    parsed.into_option()
}

fn log_invalid_number(column: Column, raw: &str, sink: &dyn Log) {
    emit(
        sink,
        Level::Debug,
        TARGET,
        format_args!("treating non-numeric {column} as absent value={raw:?}"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryLog;

    fn example_row() -> Vec<&'static str> {
        vec![
            "123 Main St",
            "24-000001",
            "Person",
            "Downtown",
            "01/05/2024",
            "1430",
            "Assault",
            "Simple Assault",
            "45.5",
            "-122.6",
            "",
            "",
            "01/06/2024",
            "1",
        ]
    }

    #[test]
    fn maps_example_row() {
        let sink = MemoryLog::new();
        let record = map_row(&example_row(), sink.as_ref());

        assert_eq!(record.address, "123 Main St");
        assert_eq!(record.case_number, "24-000001");
        assert_eq!(record.crime_against, "Person");
        assert_eq!(record.neighborhood, "Downtown");
        assert_eq!(record.offense_category, "Assault");
        assert_eq!(record.offense_type, "Simple Assault");
        assert_eq!(record.occur_date_time.to_rfc3339(), "2024-01-05T14:30:00+00:00");
        assert_eq!(record.report_date.to_rfc3339(), "2024-01-06T00:00:00+00:00");
        assert_eq!(record.open_data_lat, Some(45.5));
        assert_eq!(record.open_data_lon, Some(-122.6));
        assert_eq!(record.open_data_x, None);
        assert_eq!(record.open_data_y, None);
        assert_eq!(record.offense_count, Some(1));
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn required_strings_are_verbatim() {
        let sink = MemoryLog::new();
        let mut row = example_row();
        row[0] = "  4200 BLOCK OF SE  DIVISION ";
        row[3] = "";
        let record = map_row(&row, sink.as_ref());

        assert_eq!(record.address, "  4200 BLOCK OF SE  DIVISION ");
        assert_eq!(record.neighborhood, "");
        assert!(sink.at_level(Level::Error).is_empty());
    }

    #[test]
    fn wrong_column_count_yields_zero_record_and_one_error() {
        for len in [0, 1, 13, 15, 20] {
            let sink = MemoryLog::new();
            let row = vec!["x"; len];
            let record = map_row(&row, sink.as_ref());

            assert!(record.is_zero(), "len {len} should map to zero record");
            let errors = sink.at_level(Level::Error);
            assert_eq!(errors.len(), 1, "len {len}");
            assert!(errors[0].message.contains(&format!("row length={len}")));
        }
    }

    #[test]
    fn malformed_dates_use_sentinel() {
        let sink = MemoryLog::new();
        let mut row = example_row();
        row[4] = "2024-01-05";
        row[5] = "2:30 PM";
        row[12] = "";
        let record = map_row(&row, sink.as_ref());

        assert_eq!(record.occur_date_time, sentinel_timestamp());
        assert_eq!(record.report_date, sentinel_timestamp());
        assert!(!record.is_zero());

        let errors = sink.at_level(Level::Error);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("\"2:30 PM\""));
    }

    #[test]
    fn bad_time_alone_uses_sentinel() {
        let sink = MemoryLog::new();
        let mut row = example_row();
        row[5] = "9999";
        let record = map_row(&row, sink.as_ref());

        assert_eq!(record.occur_date_time, sentinel_timestamp());
        assert_eq!(record.report_date.to_rfc3339(), "2024-01-06T00:00:00+00:00");
    }

    #[test]
    fn loosely_formatted_dates_use_sentinel() {
        let cases = [
            ("1/5/2024", "1430"),
            ("01/05/24", "1430"),
            ("01/05/2024", " 1430"),
        ];
        for (date, time) in cases {
            let sink = MemoryLog::new();
            let mut row = example_row();
            row[4] = date;
            row[5] = time;
            row[12] = date;
            let record = map_row(&row, sink.as_ref());

            assert_eq!(record.occur_date_time, sentinel_timestamp(), "{date:?} {time:?}");
            let errors = sink.at_level(Level::Error);
            if date == "01/05/2024" {
                assert_eq!(record.report_date.to_rfc3339(), "2024-01-05T00:00:00+00:00");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("\" 1430\""));
            } else {
                assert_eq!(record.report_date, sentinel_timestamp(), "{date:?}");
                assert_eq!(errors.len(), 2);
                assert!(errors[1].message.contains(&format!("{date:?}")));
            }
        }
    }

    #[test]
    fn non_numeric_optionals_are_absent_not_zero() {
        let sink = MemoryLog::new();
        let mut row = example_row();
        row[8] = "n/a";
        row[9] = "";
        row[10] = "7654321.5";
        row[11] = "inf";
        row[13] = "one";
        let record = map_row(&row, sink.as_ref());

        assert_eq!(record.open_data_lat, None);
        assert_eq!(record.open_data_lon, None);
        assert_eq!(record.open_data_x, Some(7_654_321.5));
        assert_eq!(record.open_data_y, None);
        assert_eq!(record.offense_count, None);
        assert!(sink.at_level(Level::Error).is_empty());
        assert_eq!(sink.at_level(Level::Debug).len(), 3);
    }
}
