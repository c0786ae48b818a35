#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for the crime updater.
//!
//! A single `DuckDB` file holds both blue/green data tables and a `_meta`
//! key/value table. The [`Store`] owns one writer connection, used only by
//! the loader and metadata writes, and a round-robin pool of reader
//! connections so queries never wait behind a bulk load. Readers see only
//! committed data.

pub mod db;
pub mod loader;
pub mod meta;
pub mod pool;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use crime_updater_crime_models::CrimeRecord;
use crime_updater_database_models::{TableNameError, TablePair, validate_table_name};
use duckdb::Connection;
use tokio_util::sync::CancellationToken;

use crate::pool::ReaderPool;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (creating the database directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A table name that cannot be used as an identifier.
    #[error(transparent)]
    InvalidTableName(#[from] TableNameError),

    /// The load was cancelled before commit and rolled back.
    #[error("load cancelled; transaction rolled back")]
    Cancelled,

    /// A `_meta` value that could not be parsed.
    #[error("invalid _meta value for {key}: {value:?}")]
    InvalidMeta {
        /// Metadata key.
        key: String,
        /// Stored value.
        value: String,
    },
}

/// Owner of the `DuckDB` database: one writer plus a reader pool.
pub struct Store {
    writer: Mutex<Connection>,
    readers: ReaderPool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (or creates) the database at `path`, ensures both data tables
    /// and `_meta` exist, and builds a pool of `reader_connections`
    /// readers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory, connection, or schema cannot
    /// be created.
    pub fn open(
        path: &Path,
        reader_connections: usize,
        tables: &TablePair,
    ) -> Result<Self, DbError> {
        let conn = db::open(path)?;
        log::info!("Opened DuckDB database at {}", path.display());
        Self::from_connection(conn, reader_connections, tables)
    }

    /// Opens a private in-memory database with the same schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema cannot be created.
    pub fn open_in_memory(reader_connections: usize, tables: &TablePair) -> Result<Self, DbError> {
        Self::from_connection(
            Connection::open_in_memory()?,
            reader_connections,
            tables,
        )
    }

    fn from_connection(
        conn: Connection,
        reader_connections: usize,
        tables: &TablePair,
    ) -> Result<Self, DbError> {
        db::create_schema(&conn, tables)?;
        let readers = ReaderPool::new(&conn, reader_connections)?;
        Ok(Self {
            writer: Mutex::new(conn),
            readers,
        })
    }

    /// Replaces every row of `table` with `records` in one transaction.
    ///
    /// Blocks on the writer connection; call from a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the load fails or is cancelled. The table is
    /// then left exactly as it was.
    pub fn replace_table(
        &self,
        table: &str,
        records: &[CrimeRecord],
        cancel: &CancellationToken,
    ) -> Result<u64, DbError> {
        let mut conn = self.writer();
        loader::replace_table(&mut conn, table, records, cancel)
    }

    /// Number of committed rows in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the name is invalid or the query fails.
    pub fn row_count(&self, table: &str) -> Result<u64, DbError> {
        validate_table_name(table)?;
        let conn = self.readers.acquire();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// When `table` was last promoted, if ever.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the stored value is not a
    /// timestamp.
    pub fn loaded_at(&self, table: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        meta::get_loaded_at(&self.readers.acquire(), table)
    }

    /// Records that `table` was promoted at `loaded_at` holding `rows` rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the metadata write fails.
    pub fn set_loaded_at(
        &self,
        table: &str,
        loaded_at: DateTime<Utc>,
        rows: u64,
    ) -> Result<(), DbError> {
        meta::set_loaded_at(&mut self.writer(), table, loaded_at, rows)
    }

    /// Row count recorded in `_meta` at the last promotion of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the value is not a number.
    pub fn recorded_row_count(&self, table: &str) -> Result<Option<u64>, DbError> {
        meta::get_row_count(&self.readers.acquire(), table)
    }

    /// Borrows a reader connection for ad-hoc queries.
    pub fn reader(&self) -> MutexGuard<'_, Connection> {
        self.readers.acquire()
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-load drops the transaction, so the connection is clean.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::test_support::{records, store};

    #[test]
    fn fresh_store_has_empty_tables() {
        let store = store();
        assert_eq!(store.row_count("crime_blue").unwrap(), 0);
        assert_eq!(store.row_count("crime_green").unwrap(), 0);
        assert_eq!(store.loaded_at("crime_blue").unwrap(), None);
    }

    #[test]
    fn readers_see_committed_load() {
        let store = store();
        let loaded = store
            .replace_table("crime_green", &records(3), &CancellationToken::new())
            .unwrap();

        assert_eq!(loaded, 3);
        // Round-robin: both reader connections see the same committed data.
        assert_eq!(store.row_count("crime_green").unwrap(), 3);
        assert_eq!(store.row_count("crime_green").unwrap(), 3);
        assert_eq!(store.row_count("crime_blue").unwrap(), 0);
    }

    #[test]
    fn row_count_rejects_injection() {
        let store = store();
        assert!(matches!(
            store.row_count("crime_blue; DROP TABLE crime_green"),
            Err(super::DbError::InvalidTableName(_))
        ));
    }

    #[test]
    fn opens_file_database_and_creates_parent_dir() {
        let dir = std::env::temp_dir().join(format!(
            "crime_updater_store_test_{}",
            std::process::id()
        ));
        let path = dir.join("nested").join("crime.duckdb");

        {
            let store = super::Store::open(&path, 1, &super::test_support::tables()).unwrap();
            store
                .replace_table("crime_blue", &records(2), &CancellationToken::new())
                .unwrap();
        }

        let reopened = super::Store::open(&path, 1, &super::test_support::tables()).unwrap();
        assert_eq!(reopened.row_count("crime_blue").unwrap(), 2);

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
