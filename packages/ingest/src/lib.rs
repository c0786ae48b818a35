#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Blue/green refresh service for the City of Portland crime dataset.
//!
//! The dataset has no stable record identifier, so it cannot be upserted.
//! Instead every cycle reloads the whole dataset into whichever of two
//! tables is currently inactive and then flips readers over to it. See
//! [`coordinator`] for the swap itself and [`scheduler`] for the timer
//! that drives it.

pub mod config;
pub mod coordinator;
pub mod scheduler;

use std::sync::Arc;

use crime_updater_database::{DbError, Store};
use crime_updater_database_models::TableColor;
use crime_updater_source::SourceError;
use crime_updater_source::csv_download::CsvFetcher;
use crime_updater_source::sink;

use crate::config::Settings;
use crate::coordinator::{RefreshCoordinator, RefreshError};

/// Errors that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The database could not be opened.
    #[error("failed to open database: {0}")]
    Database(#[from] DbError),

    /// The HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    Http(#[from] SourceError),

    /// Persisted table state could not be restored.
    #[error(transparent)]
    Restore(#[from] RefreshError),
}

/// Opens the store described by `settings`.
///
/// # Errors
///
/// Returns [`DbError`] if the database cannot be opened or its schema
/// created.
pub fn open_store(settings: &Settings) -> Result<Arc<Store>, DbError> {
    Store::open(
        &settings.db_path,
        settings.reader_connections,
        &settings.tables,
    )
    .map(Arc::new)
}

/// Builds a coordinator from `settings`, logging through the process
/// logger, and restores the table state of the previous run.
///
/// # Errors
///
/// Returns [`StartupError`] if the store, HTTP client, or persisted state
/// cannot be set up.
pub fn open_coordinator(settings: &Settings) -> Result<RefreshCoordinator, StartupError> {
    let store = open_store(settings)?;
    let fetcher = CsvFetcher::new(settings.http_timeout, settings.http_retries)?;

    let coordinator = RefreshCoordinator::new(
        store,
        Arc::new(fetcher),
        settings.csv_urls.clone(),
        settings.tables.clone(),
        sink::global(),
    );

    match coordinator.restore()? {
        Some(active) => log::info!(
            "Active table is {} ({}), loaded {}",
            active.name,
            active.color,
            active.last_updated.to_rfc3339()
        ),
        None => log::info!("No table has been loaded yet"),
    }

    Ok(coordinator)
}

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub color: TableColor,
    pub name: String,
    pub loaded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rows: u64,
    pub active: bool,
}

/// Reports both tables' load time, row count, and which one is active.
///
/// # Errors
///
/// Returns [`DbError`] if the metadata or counts cannot be read.
pub fn table_status(store: &Store, settings: &Settings) -> Result<Vec<TableStatus>, DbError> {
    let mut tables = settings.tables.clone();
    for color in [TableColor::Blue, TableColor::Green] {
        if let Some(at) = store.loaded_at(tables.get(color).name())? {
            tables.restore(color, at);
        }
    }
    let active = tables.active().map(|a| a.color);

    [TableColor::Blue, TableColor::Green]
        .into_iter()
        .map(|color| {
            let descriptor = tables.get(color);
            Ok(TableStatus {
                color,
                name: descriptor.name().to_string(),
                loaded_at: descriptor.is_loaded().then_some(descriptor.last_updated()),
                rows: store.row_count(descriptor.name())?,
                active: active == Some(color),
            })
        })
        .collect()
}
