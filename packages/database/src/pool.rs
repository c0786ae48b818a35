//! Round-robin pool of reader connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::Connection;

use crate::DbError;

/// A fixed set of `DuckDB` connections handed out round-robin.
///
/// `duckdb::Connection` is `Send` but not `Sync`, so each connection is
/// wrapped in a `Mutex`. All connections are clones of the writer, so
/// they share one database instance and see every committed write.
pub struct ReaderPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReaderPool {
    /// Clones `size` connections from `conn`. A `size` of zero is raised
    /// to one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any clone fails.
    pub fn new(conn: &Connection, size: usize) -> Result<Self, DbError> {
        let connections = (0..size.max(1))
            .map(|_| conn.try_clone().map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    /// Acquires the next connection from the pool (round-robin).
    pub fn acquire(&self) -> MutexGuard<'_, Connection> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connections in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_still_yields_a_connection() {
        let conn = Connection::open_in_memory().unwrap();
        let pool = ReaderPool::new(&conn, 0).unwrap();
        assert_eq!(pool.len(), 1);
        let one: i32 = pool.acquire().query_row("SELECT 1", [], |r| r.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn readers_share_the_writer_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();
        let pool = ReaderPool::new(&conn, 3).unwrap();

        for _ in 0..3 {
            let v: i32 = pool
                .acquire()
                .query_row("SELECT v FROM t", [], |r| r.get(0))
                .unwrap();
            assert_eq!(v, 7);
        }
    }
}
