#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Source side of the crime updater: downloading CSV files and turning raw
//! rows into [`CrimeRecord`](crime_updater_crime_models::CrimeRecord)s.
//!
//! Anything that can produce raw rows for a URL implements the [`Fetcher`]
//! trait. [`csv_download::CsvFetcher`] is the HTTP implementation; the
//! refresh coordinator only ever sees the trait.

pub mod csv_download;
pub mod mapper;
pub mod parsing;
pub mod retry;
pub mod sink;

use async_trait::async_trait;

/// One raw CSV row: the column values in file order.
pub type RawRow = Vec<String>;

/// Errors that can occur while fetching source data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status we do not accept.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code.
        status: reqwest::StatusCode,
        /// Requested URL.
        url: String,
    },

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The fetch was abandoned because shutdown was requested.
    #[error("fetch cancelled")]
    Cancelled,
}

/// Produces raw CSV rows for a URL.
///
/// The first row returned is the header row; callers are expected to skip
/// it. Implementations apply their own timeout and retry policy and only
/// return an error once that policy is exhausted.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `url` and returns every row, header included.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the download fails after all retries or
    /// the body is not valid CSV.
    async fn fetch(&self, url: &str) -> Result<Vec<RawRow>, SourceError>;
}
