//! Full-replace bulk loader.
//!
//! A load is one transaction: `DELETE` every row, insert the new records in
//! multi-row chunks, commit. Any error or a cancellation observed before
//! the commit drops the transaction, which rolls it back and leaves the
//! table exactly as it was. Other connections never see the in-flight
//! rows.
//!
//! Nothing here logs; the caller reports the outcome through its own sink.

use crime_updater_crime_models::CrimeRecord;
use crime_updater_database_models::validate_table_name;
use duckdb::{Connection, Statement};
use tokio_util::sync::CancellationToken;

use crate::DbError;

/// Number of rows per INSERT statement.
pub const CHUNK_SIZE: usize = 1_000;

/// Columns written per record, in bind order.
const COLUMNS: &str = "address, case_number, crime_against, neighborhood, occur_date_time, \
     offense_category, offense_type, open_data_lat, open_data_lon, open_data_x, open_data_y, \
     report_date, offense_count";

const PARAMS_PER_ROW: usize = 13;

/// Timestamp text format bound into `TIMESTAMP` columns.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Replaces the full contents of `table` with `records`.
///
/// Returns the number of rows inserted.
///
/// # Errors
///
/// Returns [`DbError::InvalidTableName`] for a bad name,
/// [`DbError::Cancelled`] if `cancel` fires before commit, or
/// [`DbError::DuckDb`] for any database failure. In every error case the
/// transaction is rolled back.
pub fn replace_table(
    conn: &mut Connection,
    table: &str,
    records: &[CrimeRecord],
    cancel: &CancellationToken,
) -> Result<u64, DbError> {
    validate_table_name(table)?;

    let tx = conn.transaction()?;

    tx.execute(&format!("DELETE FROM {table}"), [])?;

    let mut total_inserted = 0u64;

    for chunk in records.chunks(CHUNK_SIZE) {
        if cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }

        let mut stmt = tx.prepare(&insert_sql(table, chunk.len()))?;
        bind_chunk(&mut stmt, chunk)?;
        let rows = stmt.raw_execute()?;
        total_inserted += u64::try_from(rows).unwrap_or(0);
    }

    if cancel.is_cancelled() {
        return Err(DbError::Cancelled);
    }

    tx.commit()?;

    Ok(total_inserted)
}

fn insert_sql(table: &str, rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; PARAMS_PER_ROW].join(", "));

    let mut sql = format!("INSERT INTO {table} ({COLUMNS}) VALUES ");
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&placeholders);
    }
    sql
}

fn bind_chunk(stmt: &mut Statement<'_>, chunk: &[CrimeRecord]) -> Result<(), DbError> {
    let mut param_idx = 1usize;

    for record in chunk {
        stmt.raw_bind_parameter(param_idx, &record.address)?;
        stmt.raw_bind_parameter(param_idx + 1, &record.case_number)?;
        stmt.raw_bind_parameter(param_idx + 2, &record.crime_against)?;
        stmt.raw_bind_parameter(param_idx + 3, &record.neighborhood)?;
        stmt.raw_bind_parameter(
            param_idx + 4,
            record.occur_date_time.format(TIMESTAMP_FORMAT).to_string(),
        )?;
        stmt.raw_bind_parameter(param_idx + 5, &record.offense_category)?;
        stmt.raw_bind_parameter(param_idx + 6, &record.offense_type)?;
        stmt.raw_bind_parameter(param_idx + 7, record.open_data_lat)?;
        stmt.raw_bind_parameter(param_idx + 8, record.open_data_lon)?;
        stmt.raw_bind_parameter(param_idx + 9, record.open_data_x)?;
        stmt.raw_bind_parameter(param_idx + 10, record.open_data_y)?;
        stmt.raw_bind_parameter(
            param_idx + 11,
            record.report_date.format(TIMESTAMP_FORMAT).to_string(),
        )?;
        stmt.raw_bind_parameter(param_idx + 12, record.offense_count)?;

        param_idx += PARAMS_PER_ROW;
    }

    Ok(())
}
