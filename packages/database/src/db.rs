//! Connection setup and schema bootstrap.

use std::path::Path;

use crime_updater_database_models::{META_TABLE, TablePair};
use duckdb::Connection;

use crate::DbError;

/// Opens (or creates) the `DuckDB` file at `path`, creating its parent
/// directory first.
///
/// # Errors
///
/// Returns [`DbError`] if the directory or connection cannot be created.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_dir(parent)?;
    }

    Ok(Connection::open(path)?)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Creates both data tables and `_meta` if they do not exist yet.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn create_schema(conn: &Connection, tables: &TablePair) -> Result<(), DbError> {
    for table in [tables.blue().name(), tables.green().name()] {
        conn.execute_batch(&crime_table_ddl(table))?;
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {META_TABLE} (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );"
    ))?;

    Ok(())
}

/// `CREATE TABLE` statement for one crime data table.
///
/// `table` must already be a validated identifier.
#[must_use]
pub fn crime_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            address TEXT NOT NULL,
            case_number TEXT NOT NULL,
            crime_against TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            occur_date_time TIMESTAMP NOT NULL,
            offense_category TEXT NOT NULL,
            offense_type TEXT NOT NULL,
            open_data_lat DOUBLE,
            open_data_lon DOUBLE,
            open_data_x DOUBLE,
            open_data_y DOUBLE,
            report_date TIMESTAMP NOT NULL,
            offense_count INTEGER
        );"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tables;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn, &tables()).unwrap();
        create_schema(&conn, &tables()).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables
                 WHERE table_name IN ('crime_blue', 'crime_green', '_meta')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
