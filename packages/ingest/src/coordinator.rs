//! Blue/green refresh coordinator.
//!
//! Owns the [`TablePair`] and drives one refresh cycle at a time:
//! fetch every source, map rows, bulk-load the inactive table, then
//! promote it by stamping its `last_updated`. The promotion is a single
//! write under the pair's write lock, so readers always see either the old
//! or the new active table and never a mix. A failure at any step leaves
//! both descriptors untouched.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use crime_updater_crime_models::CrimeRecord;
use crime_updater_database::{DbError, Store};
use crime_updater_database_models::{ActiveTable, TableColor, TablePair};
use crime_updater_ingest_models::{RefreshPhase, RefreshReport};
use crime_updater_source::mapper::map_row;
use crime_updater_source::sink::{LogSink, emit};
use crime_updater_source::{Fetcher, RawRow, SourceError};
use log::{Level, Log};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

const TARGET: &str = module_path!();

/// Errors that abort a refresh cycle.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Another cycle holds the cycle lock.
    #[error("a refresh cycle is already running")]
    AlreadyRunning,

    /// A source could not be downloaded.
    #[error("fetching {url} failed: {source}")]
    Fetch {
        /// Source URL.
        url: String,
        /// Underlying fetch error.
        #[source]
        source: SourceError,
    },

    /// Every source was fetched but no usable record came out.
    #[error("no valid records in {rows} fetched rows; keeping the active table")]
    EmptyDataset {
        /// Data rows fetched (all discarded).
        rows: u64,
    },

    /// The bulk load into the inactive table failed and was rolled back.
    #[error("loading {table} failed: {source}")]
    Load {
        /// Table being loaded.
        table: String,
        /// Underlying database error.
        #[source]
        source: DbError,
    },

    /// Reading persisted load timestamps failed.
    #[error("restoring table state failed: {0}")]
    Restore(#[source] DbError),

    /// Shutdown was requested before the cycle could finish.
    #[error("refresh cancelled")]
    Cancelled,

    /// A blocking mapping or load task panicked or was aborted.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs blue/green refresh cycles and answers "which table is active".
pub struct RefreshCoordinator {
    tables: RwLock<TablePair>,
    store: Arc<Store>,
    fetcher: Arc<dyn Fetcher>,
    urls: Vec<String>,
    sink: LogSink,
    cycle: Mutex<()>,
    phase: watch::Sender<RefreshPhase>,
    active: watch::Sender<Option<ActiveTable>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("tables", &self.tables())
            .field("urls", &self.urls)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Creates a coordinator with both tables marked never loaded.
    ///
    /// Call [`Self::restore`] afterwards to pick up timestamps persisted by
    /// a previous run.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        fetcher: Arc<dyn Fetcher>,
        urls: Vec<String>,
        tables: TablePair,
        sink: LogSink,
    ) -> Self {
        let active = tables.active();
        Self {
            tables: RwLock::new(tables),
            store,
            fetcher,
            urls,
            sink,
            cycle: Mutex::new(()),
            phase: watch::channel(RefreshPhase::Idle).0,
            active: watch::channel(active).0,
        }
    }

    /// Loads both tables' promotion timestamps from the store's `_meta`.
    ///
    /// Returns the active table after restoring, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::AlreadyRunning`] if a cycle is in progress,
    /// or [`RefreshError::Restore`] if the metadata cannot be read. The
    /// descriptors are unchanged on error.
    pub fn restore(&self) -> Result<Option<ActiveTable>, RefreshError> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            return Err(RefreshError::AlreadyRunning);
        };

        let snapshot = self.tables();
        let mut restored = Vec::with_capacity(2);
        for color in [TableColor::Blue, TableColor::Green] {
            let name = snapshot.get(color).name();
            if let Some(at) = self.store.loaded_at(name).map_err(RefreshError::Restore)? {
                restored.push((color, at));
            }
        }

        let active = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            for (color, at) in restored {
                tables.restore(color, at);
            }
            tables.active()
        };

        if let Some(active) = &active {
            self.info(format_args!(
                "restored active table {} last_updated={}",
                active.name,
                active.last_updated.to_rfc3339()
            ));
        }
        self.active.send_replace(active.clone());

        Ok(active)
    }

    /// Name of the table with the later `last_updated`; blue on a tie.
    ///
    /// Before any load this is the blue table. Use [`Self::active_table`]
    /// to tell "no data yet" apart.
    #[must_use]
    pub fn last_updated_table(&self) -> String {
        self.read_tables().last_updated_name().to_string()
    }

    /// The table readers should query, or `None` if nothing was ever
    /// loaded.
    #[must_use]
    pub fn active_table(&self) -> Option<ActiveTable> {
        self.read_tables().active()
    }

    /// A consistent copy of both descriptors.
    #[must_use]
    pub fn tables(&self) -> TablePair {
        self.read_tables().clone()
    }

    /// Current cycle phase.
    #[must_use]
    pub fn phase(&self) -> RefreshPhase {
        *self.phase.borrow()
    }

    /// Receives every phase transition.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<RefreshPhase> {
        self.phase.subscribe()
    }

    /// Receives the new active table after every promotion.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveTable>> {
        self.active.subscribe()
    }

    /// The store this coordinator loads into.
    #[must_use]
    pub const fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Runs one full refresh cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError`] if another cycle is running or any step
    /// fails. On error no descriptor has changed and the previously active
    /// table keeps serving.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            self.warn(format_args!("refresh requested while a cycle is running; skipping"));
            return Err(RefreshError::AlreadyRunning);
        };

        let result = self.run_cycle(cancel).await;

        if let Err(e) = &result {
            self.phase.send_replace(RefreshPhase::Failed);
            emit(
                self.sink.as_ref(),
                Level::Error,
                TARGET,
                format_args!("refresh failed; active table unchanged: {e}"),
            );
        }
        self.phase.send_replace(RefreshPhase::Idle);

        result
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let started = Instant::now();
        let (color, table) = {
            let tables = self.read_tables();
            let color = tables.inactive_color();
            (color, tables.get(color).name().to_string())
        };

        self.phase.send_replace(RefreshPhase::Fetching);
        self.info(format_args!(
            "refreshing {table} ({color}) from {} source(s)",
            self.urls.len()
        ));
        let fetched = self.fetch_all(cancel).await?;

        if fetched.records.is_empty() {
            return Err(RefreshError::EmptyDataset {
                rows: fetched.rows,
            });
        }

        self.phase.send_replace(RefreshPhase::Loading);
        let rows_loaded = self.load(&table, fetched.records, cancel).await?;
        self.info(format_args!("loaded {rows_loaded} rows into {table}"));

        self.phase.send_replace(RefreshPhase::Promoting);
        let (promoted_at, active) = self.promote(color);
        self.persist_promotion(&table, promoted_at, rows_loaded).await;
        self.active.send_replace(active);

        self.info(format_args!(
            "promoted {table} as active table last_updated={} rows={rows_loaded}",
            promoted_at.to_rfc3339()
        ));

        Ok(RefreshReport {
            color,
            table,
            rows_fetched: fetched.rows,
            rows_discarded: fetched.discarded,
            rows_loaded,
            promoted_at,
            duration: started.elapsed(),
        })
    }

    async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Fetched, RefreshError> {
        let mut fetched = Fetched::default();

        for url in &self.urls {
            let rows = tokio::select! {
                () = cancel.cancelled() => return Err(RefreshError::Cancelled),
                rows = self.fetcher.fetch(url) => rows.map_err(|source| RefreshError::Fetch {
                    url: url.clone(),
                    source,
                })?,
            };

            let sink = Arc::clone(&self.sink);
            let mapped =
                tokio::task::spawn_blocking(move || map_rows(&rows, sink.as_ref())).await?;

            fetched.rows += mapped.rows;
            fetched.discarded += mapped.discarded;
            self.info(format_args!(
                "fetched {url}: {} records, {} discarded",
                mapped.records.len(),
                mapped.discarded
            ));
            fetched.records.extend(mapped.records);
        }

        if fetched.discarded > 0 {
            self.warn(format_args!(
                "discarded {} malformed rows out of {}",
                fetched.discarded, fetched.rows
            ));
        }

        Ok(fetched)
    }

    async fn load(
        &self,
        table: &str,
        records: Vec<CrimeRecord>,
        cancel: &CancellationToken,
    ) -> Result<u64, RefreshError> {
        let store = Arc::clone(&self.store);
        let name = table.to_string();
        let cancel = cancel.clone();

        let result =
            tokio::task::spawn_blocking(move || store.replace_table(&name, &records, &cancel))
                .await?;

        result.map_err(|source| match source {
            DbError::Cancelled => RefreshError::Cancelled,
            source => RefreshError::Load {
                table: table.to_string(),
                source,
            },
        })
    }

    fn promote(&self, color: TableColor) -> (DateTime<Utc>, Option<ActiveTable>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let promoted_at = tables.promote(color, Utc::now());
        (promoted_at, tables.active())
    }

    async fn persist_promotion(&self, table: &str, promoted_at: DateTime<Utc>, rows: u64) {
        let store = Arc::clone(&self.store);
        let name = table.to_string();
        let result =
            tokio::task::spawn_blocking(move || store.set_loaded_at(&name, promoted_at, rows))
                .await;

        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        self.warn(format_args!(
            "could not persist promotion of {table}; it will not survive a restart: {error}"
        ));
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, TablePair> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn info(&self, args: std::fmt::Arguments<'_>) {
        emit(self.sink.as_ref(), Level::Info, TARGET, args);
    }

    fn warn(&self, args: std::fmt::Arguments<'_>) {
        emit(self.sink.as_ref(), Level::Warn, TARGET, args);
    }
}

#[derive(Default)]
struct Fetched {
    records: Vec<CrimeRecord>,
    rows: u64,
    discarded: u64,
}

/// Maps every data row of one download, skipping the header row and
/// dropping zero-valued records.
fn map_rows(rows: &[RawRow], sink: &dyn Log) -> Fetched {
    let mut mapped = Fetched::default();
    for row in rows.iter().skip(1) {
        mapped.rows += 1;
        let record = map_row(row.as_slice(), sink);
        if record.is_zero() {
            mapped.discarded += 1;
        } else {
            mapped.records.push(record);
        }
    }
    mapped
}
