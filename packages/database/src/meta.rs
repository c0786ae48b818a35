//! Key/value metadata kept in the `_meta` table.
//!
//! Each promotion records when the table was loaded and how many rows it
//! holds, under `loaded_at:<table>` and `row_count:<table>`. The
//! coordinator reads these back at startup to recover which table is
//! active.

use chrono::{DateTime, Utc};
use duckdb::Connection;

use crate::DbError;

fn loaded_at_key(table: &str) -> String {
    format!("loaded_at:{table}")
}

fn row_count_key(table: &str) -> String {
    format!("row_count:{table}")
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    let result = stmt.query_row([key], |row| row.get(0));
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

/// Reads the promotion timestamp of `table`.
///
/// # Errors
///
/// Returns [`DbError::InvalidMeta`] if the stored value is not RFC 3339.
pub fn get_loaded_at(conn: &Connection, table: &str) -> Result<Option<DateTime<Utc>>, DbError> {
    let key = loaded_at_key(table);
    get_meta(conn, &key)?
        .map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| DbError::InvalidMeta { key, value })
        })
        .transpose()
}

/// Reads the row count recorded at the last promotion of `table`.
///
/// # Errors
///
/// Returns [`DbError::InvalidMeta`] if the stored value is not a number.
pub fn get_row_count(conn: &Connection, table: &str) -> Result<Option<u64>, DbError> {
    let key = row_count_key(table);
    get_meta(conn, &key)?
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| DbError::InvalidMeta { key, value })
        })
        .transpose()
}

/// Records a promotion of `table`. Both keys are written in one
/// transaction.
///
/// # Errors
///
/// Returns [`DbError`] if either write fails; neither is then kept.
pub fn set_loaded_at(
    conn: &mut Connection,
    table: &str,
    loaded_at: DateTime<Utc>,
    rows: u64,
) -> Result<(), DbError> {
    let tx = conn.transaction()?;
    set_meta(&tx, &loaded_at_key(table), &loaded_at.to_rfc3339())?;
    set_meta(&tx, &row_count_key(table), &rows.to_string())?;
    tx.commit()?;
    Ok(())
}
