//! HTTP CSV fetcher.
//!
//! Downloads a whole CSV file with the configured timeout and retry
//! budget, then splits it into raw rows. Cells are returned exactly as they
//! appear in the file (no trimming) and rows may have any length; the
//! record mapper is the one that judges column counts.

use std::time::Duration;

use async_trait::async_trait;

use crate::retry::{self, RetryPolicy};
use crate::{Fetcher, RawRow, SourceError};

/// `User-Agent` sent with every download.
const USER_AGENT: &str = concat!("crime_updater/", env!("CARGO_PKG_VERSION"));

/// Fetches CSV files over HTTP(S).
#[derive(Debug, Clone)]
pub struct CsvFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl CsvFetcher {
    /// Creates a fetcher whose requests time out after `timeout` and are
    /// retried up to `retries` times.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration, retries: u32) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            policy: RetryPolicy::new(retries),
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Fetcher for CsvFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawRow>, SourceError> {
        let bytes = retry::send_bytes(|| self.client.get(url), &self.policy).await?;
        log::debug!("Downloaded {} bytes from {url}", bytes.len());

        let rows = parse_rows(&bytes)?;
        log::info!("Parsed {} rows (header included) from {url}", rows.len());
        Ok(rows)
    }
}

/// Splits a CSV body into rows, header included.
///
/// Quoted fields may contain commas and newlines. Rows are allowed to have
/// differing lengths.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] if the body is not valid CSV (for example,
/// a cell that is not valid UTF-8).
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<RawRow>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(ToOwned::to_owned).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_header_row() {
        let rows = parse_rows(b"Address,CaseNumber\n123 Main St,24-1\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Address", "CaseNumber"]);
        assert_eq!(rows[1], vec!["123 Main St", "24-1"]);
    }

    #[test]
    fn quoted_commas_and_spaces_survive() {
        let rows = parse_rows(b"a,b\n\"Smith, John\",\"  padded \"\n").unwrap();
        assert_eq!(rows[1], vec!["Smith, John", "  padded "]);
    }

    #[test]
    fn ragged_rows_are_returned_as_is() {
        let rows = parse_rows(b"a,b,c\n1,2\n1,2,3,4\n").unwrap();
        assert_eq!(rows[1].len(), 2);
        assert_eq!(rows[2].len(), 4);
    }

    #[test]
    fn empty_body_has_no_rows() {
        assert!(parse_rows(b"").unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let result = parse_rows(b"a,b\n\xff\xfe,1\n");
        assert!(matches!(result, Err(SourceError::Csv(_))));
    }
}
