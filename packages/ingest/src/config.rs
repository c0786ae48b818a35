//! Service configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, a TOML
//! file, `UPDATER_<SECTION>_<KEY>` environment variables, then command
//! line flags. [`Config::validate`] turns the merged result into
//! [`Settings`], the typed values the service actually runs with.
//!
//! ```toml
//! [database]
//! path = "data/crime_updater.duckdb"
//! reader-connections = 4
//!
//! [service]
//! check-interval = "24h"
//! csv-urls = ["https://public.tableau.com/.../CrimeData-2024.csv"]
//! blue-table = "crime_blue"
//! green-table = "crime_green"
//! run-on-start = true
//!
//! [http]
//! timeout = "30s"
//! retries = 3
//!
//! [logger]
//! level = "info"
//! format = "text"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::time::Duration;

use crime_updater_cli_utils::LogFormat;
use crime_updater_database_models::{TableNameError, TablePair};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Prefix of every environment variable the service reads.
pub const ENV_PREFIX: &str = "UPDATER";

/// Files tried, in order, when no `--config` is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config.toml", "config/config.toml"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} in {key}: {reason}")]
    Env {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    TableName(#[from] TableNameError),
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub reader_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/crime_updater.duckdb"),
            reader_connections: 4,
        }
    }
}

/// `[service]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ServiceConfig {
    pub check_interval: String,
    pub csv_urls: Vec<String>,
    pub blue_table: String,
    pub green_table: String,
    pub run_on_start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            check_interval: "24h".to_string(),
            csv_urls: Vec::new(),
            blue_table: "crime_blue".to_string(),
            green_table: "crime_green".to_string(),
            run_on_start: true,
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct HttpConfig {
    pub timeout: String,
    pub retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: "30s".to_string(),
            retries: 3,
        }
    }
}

/// `[logger]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct LoggerConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Raw, unvalidated configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub logger: LoggerConfig,
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub interval: Option<String>,
    pub csv_urls: Vec<String>,
    pub blue_table: Option<String>,
    pub green_table: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub reader_connections: usize,
    pub check_interval: Duration,
    pub csv_urls: Vec<String>,
    pub tables: TablePair,
    pub run_on_start: bool,
    pub http_timeout: Duration,
    pub http_retries: u32,
    pub log_level: LevelFilter,
    pub log_format: LogFormat,
}

impl Config {
    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(toml_str)
    }

    /// Defaults merged with the config file.
    ///
    /// An explicit `path` must exist. Without one, the
    /// [`DEFAULT_CONFIG_PATHS`] are tried and plain defaults are used if
    /// none exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
                Some(found) => found.to_path_buf(),
                None => {
                    log::debug!("No config file found; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        log::debug!("Loaded config file {}", path.display());

        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Applies `UPDATER_<SECTION>_<KEY>` variables looked up via `lookup`.
    ///
    /// `UPDATER_SERVICE_CSV_URLS` is a comma-separated list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for a value that does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{ENV_PREFIX}_{suffix}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("DATABASE_PATH") {
            self.database.path = PathBuf::from(value);
        }
        if let Some((key, value)) = var("DATABASE_READER_CONNECTIONS") {
            self.database.reader_connections = parse_env(key, value)?;
        }
        if let Some((_, value)) = var("SERVICE_CHECK_INTERVAL") {
            self.service.check_interval = value;
        }
        if let Some((_, value)) = var("SERVICE_CSV_URLS") {
            self.service.csv_urls = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some((_, value)) = var("SERVICE_BLUE_TABLE") {
            self.service.blue_table = value;
        }
        if let Some((_, value)) = var("SERVICE_GREEN_TABLE") {
            self.service.green_table = value;
        }
        if let Some((key, value)) = var("SERVICE_RUN_ON_START") {
            self.service.run_on_start = parse_env(key, value)?;
        }
        if let Some((_, value)) = var("HTTP_TIMEOUT") {
            self.http.timeout = value;
        }
        if let Some((key, value)) = var("HTTP_RETRIES") {
            self.http.retries = parse_env(key, value)?;
        }
        if let Some((_, value)) = var("LOGGER_LEVEL") {
            self.logger.level = value;
        }
        if let Some((_, value)) = var("LOGGER_FORMAT") {
            self.logger.format = value;
        }

        Ok(())
    }

    /// Applies command line values on top of everything else.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        let Overrides {
            db_path,
            interval,
            csv_urls,
            blue_table,
            green_table,
            timeout,
            retries,
            log_level,
            log_format,
        } = overrides;

        if let Some(path) = db_path {
            self.database.path = path;
        }
        if let Some(interval) = interval {
            self.service.check_interval = interval;
        }
        if !csv_urls.is_empty() {
            self.service.csv_urls = csv_urls;
        }
        if let Some(name) = blue_table {
            self.service.blue_table = name;
        }
        if let Some(name) = green_table {
            self.service.green_table = name;
        }
        if let Some(timeout) = timeout {
            self.http.timeout = timeout;
        }
        if let Some(retries) = retries {
            self.http.retries = retries;
        }
        if let Some(level) = log_level {
            self.logger.level = level;
        }
        if let Some(format) = log_format {
            self.logger.format = format;
        }
    }

    /// Checks every value and converts to [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let check_interval = parse_duration("service.check-interval", &self.service.check_interval)?;
        let http_timeout = parse_duration("http.timeout", &self.http.timeout)?;

        if self.service.csv_urls.is_empty() {
            return Err(ConfigError::Invalid {
                field: "service.csv-urls",
                reason: "at least one CSV URL is required".to_string(),
            });
        }
        for url in &self.service.csv_urls {
            validate_url(url)?;
        }

        if self.database.reader_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "database.reader-connections",
                reason: "must be at least 1".to_string(),
            });
        }

        let tables = TablePair::new(&self.service.blue_table, &self.service.green_table)?;

        let log_level =
            LevelFilter::from_str(&self.logger.level).map_err(|_| ConfigError::Invalid {
                field: "logger.level",
                reason: format!(
                    "{:?} is not one of trace, debug, info, warn, error, off",
                    self.logger.level
                ),
            })?;
        let log_format =
            LogFormat::from_str(&self.logger.format).map_err(|_| ConfigError::Invalid {
                field: "logger.format",
                reason: format!("{:?} is not one of text, json", self.logger.format),
            })?;

        Ok(Settings {
            db_path: self.database.path.clone(),
            reader_connections: self.database.reader_connections,
            check_interval,
            csv_urls: self.service.csv_urls.clone(),
            tables,
            run_on_start: self.service.run_on_start,
            http_timeout,
            http_retries: self.http.retries,
            log_level,
            log_format,
        })
    }
}

fn parse_env<T>(key: String, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Env {
        reason: e.to_string(),
        key,
        value,
    })
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(value).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{value:?}: {e}"),
    })?;

    if duration.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(duration)
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: "service.csv-urls",
        reason: format!("{url:?}: {reason}"),
    };

    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const URL: &str = "https://example.test/CrimeData-2024.csv";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn with_url() -> Config {
        let mut config = Config::default();
        config.service.csv_urls = vec![URL.to_string()];
        config
    }

    #[test]
    fn defaults_validate_once_a_url_is_set() {
        let settings = with_url().validate().unwrap();

        assert_eq!(settings.check_interval, Duration::from_secs(24 * 60 * 60));
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.http_retries, 3);
        assert_eq!(settings.reader_connections, 4);
        assert_eq!(settings.tables.blue().name(), "crime_blue");
        assert_eq!(settings.tables.green().name(), "crime_green");
        assert!(settings.run_on_start);
        assert_eq!(settings.log_level, LevelFilter::Info);
        assert_eq!(settings.log_format, LogFormat::Text);
    }

    #[test]
    fn parses_kebab_case_toml_and_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [service]
            check-interval = "6h 30m"
            csv-urls = ["https://example.test/a.csv", "https://example.test/b.csv"]
            run-on-start = false

            [logger]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.csv_urls.len(), 2);
        assert_eq!(config.service.blue_table, "crime_blue");
        assert_eq!(config.http.retries, 3);

        let settings = config.validate().unwrap();
        assert_eq!(settings.check_interval, Duration::from_secs(6 * 3600 + 30 * 60));
        assert!(!settings.run_on_start);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml_str("[service]\ncsv_url = \"x\"\n").is_err());
    }

    #[test]
    fn precedence_is_defaults_file_env_flags() {
        let mut config = Config::from_toml_str(
            r#"
            [service]
            check-interval = "1h"
            blue-table = "file_blue"
            green-table = "file_green"
            csv-urls = ["https://file.test/a.csv"]

            [http]
            retries = 5
            "#,
        )
        .unwrap();

        config
            .apply_env(env(&[
                ("UPDATER_SERVICE_CHECK_INTERVAL", "2h"),
                ("UPDATER_SERVICE_GREEN_TABLE", "env_green"),
                (
                    "UPDATER_SERVICE_CSV_URLS",
                    "https://env.test/a.csv, https://env.test/b.csv",
                ),
                ("UPDATER_HTTP_TIMEOUT", "10s"),
            ]))
            .unwrap();

        config.apply_overrides(Overrides {
            interval: Some("3h".to_string()),
            timeout: None,
            ..Overrides::default()
        });

        let settings = config.validate().unwrap();
        assert_eq!(settings.check_interval, Duration::from_secs(3 * 3600));
        assert_eq!(settings.tables.blue().name(), "file_blue");
        assert_eq!(settings.tables.green().name(), "env_green");
        assert_eq!(
            settings.csv_urls,
            vec!["https://env.test/a.csv", "https://env.test/b.csv"]
        );
        assert_eq!(settings.http_timeout, Duration::from_secs(10));
        assert_eq!(settings.http_retries, 5);
    }

    #[test]
    fn repeated_csv_flags_replace_configured_urls() {
        let mut config = with_url();
        config.apply_overrides(Overrides {
            csv_urls: vec![
                "https://flag.test/1.csv".to_string(),
                "https://flag.test/2.csv".to_string(),
            ],
            ..Overrides::default()
        });
        assert_eq!(config.service.csv_urls.len(), 2);
        assert!(config.service.csv_urls[0].starts_with("https://flag.test"));
    }

    #[test]
    fn bad_env_numbers_are_reported() {
        let mut config = with_url();
        let err = config
            .apply_env(env(&[("UPDATER_HTTP_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "UPDATER_HTTP_RETRIES"));
    }

    #[test]
    fn missing_urls_are_rejected() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "service.csv-urls",
                ..
            }
        ));
    }

    #[test]
    fn non_http_urls_are_rejected() {
        for url in ["ftp://example.test/a.csv", "not a url", "file:///tmp/a.csv"] {
            let mut config = Config::default();
            config.service.csv_urls = vec![url.to_string()];
            assert!(config.validate().is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn zero_and_garbage_durations_are_rejected() {
        let mut config = with_url();
        config.service.check_interval = "0s".to_string();
        assert!(config.validate().is_err());

        config.service.check_interval = "soon".to_string();
        assert!(config.validate().is_err());

        config.service.check_interval = "1h".to_string();
        config.http.timeout = "0ms".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn table_names_are_checked() {
        let mut config = with_url();
        config.service.green_table = "crime_blue".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TableName(TableNameError::Duplicate(_)))
        ));

        config.service.green_table = "crime-green".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TableName(TableNameError::NotIdentifier { .. }))
        ));

        config.service.green_table = "_meta".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TableName(TableNameError::Reserved(_)))
        ));
    }

    #[test]
    fn reader_pool_and_logger_values_are_checked() {
        let mut config = with_url();
        config.database.reader_connections = 0;
        assert!(config.validate().is_err());

        let mut config = with_url();
        config.logger.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = with_url();
        config.logger.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = with_url();
        config.logger.level = "DEBUG".to_string();
        assert_eq!(config.validate().unwrap().log_level, LevelFilter::Debug);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/crime_updater.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
