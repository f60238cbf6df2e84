//! Configuration types for portal-etl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Portal session configuration (URL, credentials, export format)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal base URL
    pub url: String,

    /// Username for the portal session
    pub username: String,

    /// Password for the portal session
    pub password: String,

    /// Export format requested from the portal (default: CSV)
    #[serde(default)]
    pub export_format: ExportFormat,

    /// Portal section containing the report pages (default: "Reports")
    #[serde(default = "default_reports_section")]
    pub reports_section: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            export_format: ExportFormat::default(),
            reports_section: default_reports_section(),
        }
    }
}

/// Download directory configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory the portal exports files into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory raw exports are moved to after processing (default: "./archive")
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Clear leftover files from the download directory at run start (default: true)
    #[serde(default = "default_true")]
    pub clear_on_start: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            archive_dir: default_archive_dir(),
            clear_on_start: true,
        }
    }
}

/// Download watch configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Maximum time to wait for an export to complete (default: 300 seconds)
    #[serde(default = "default_watch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Interval between directory polls (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Extensions accepted as completed exports (default: .csv, .xlsx, .txt)
    #[serde(default = "default_final_extensions")]
    pub final_extensions: Vec<String>,

    /// Extensions marking an in-progress download (default: .crdownload, .part, .tmp)
    #[serde(default = "default_partial_extensions")]
    pub partial_extensions: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout: default_watch_timeout(),
            poll_interval: default_poll_interval(),
            final_extensions: default_final_extensions(),
            partial_extensions: default_partial_extensions(),
        }
    }
}

/// Task queue configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum automatic retries per deferred task (default: 3)
    ///
    /// A task that keeps failing executes `max_retries + 1` times before it is
    /// dropped with a terminal log entry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long the worker waits on an empty queue before re-checking for exit (default: 1 second)
    #[serde(default = "default_idle_poll", with = "duration_serde")]
    pub idle_poll: Duration,

    /// Optional execution time limit per deferred task (default: unbounded)
    ///
    /// The queue has a single worker, so a hung task blocks everything behind
    /// it. Setting this converts a hang into a normal task failure, which the
    /// retry layer then handles like any other.
    #[serde(default, with = "optional_duration_serde")]
    pub task_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            idle_poll: default_idle_poll(),
            task_timeout: None,
        }
    }
}

/// Persistence configuration for the bundled SQLite store
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (default: "./portal-etl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for a portal-etl run
///
/// Fields are organized into logical sub-configs:
/// - [`portal`](PortalConfig) — session URL, credentials, export format
/// - [`download`](DownloadConfig) — download and archive directories
/// - [`watch`](WatchConfig) — completion-watch timing and extensions
/// - [`queue`](QueueConfig) — retry bound, idle poll, optional task timeout
/// - [`database`](DatabaseConfig) — bundled SQLite store location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Portal session settings
    #[serde(default)]
    pub portal: PortalConfig,

    /// Download directory settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Download watch settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Task queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Persistence settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        if self.portal.url.is_empty() {
            return Err(Error::config("portal URL must not be empty", Some("portal.url")));
        }
        if self.watch.timeout.is_zero() {
            return Err(Error::config(
                "watch timeout must be greater than zero",
                Some("watch.timeout"),
            ));
        }
        if self.watch.poll_interval.is_zero() {
            return Err(Error::config(
                "watch poll interval must be greater than zero",
                Some("watch.poll_interval"),
            ));
        }
        if self.download.download_dir == self.download.archive_dir {
            return Err(Error::config(
                "download and archive directories must differ",
                Some("download.archive_dir"),
            ));
        }
        Ok(())
    }
}

/// Export format requested from the portal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Comma-separated values (default)
    #[default]
    Csv,
    /// Excel workbook
    Xlsx,
    /// Portable document format
    Pdf,
}

impl ExportFormat {
    /// File extension for this format, without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Xlsx => "XLSX",
            ExportFormat::Pdf => "PDF",
        };
        f.write_str(name)
    }
}

fn default_reports_section() -> String {
    "Reports".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./archive")
}

fn default_watch_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_final_extensions() -> Vec<String> {
    vec![".csv".to_string(), ".xlsx".to_string(), ".txt".to_string()]
}

fn default_partial_extensions() -> Vec<String> {
    vec![
        ".crdownload".to_string(),
        ".part".to_string(),
        ".tmp".to_string(),
    ]
}

fn default_max_retries() -> u32 {
    3
}

fn default_idle_poll() -> Duration {
    Duration::from_secs(1)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./portal-etl.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds granularity)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.watch.timeout, Duration::from_secs(300));
        assert_eq!(config.watch.poll_interval, Duration::from_secs(1));
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.task_timeout, None);
        assert_eq!(config.portal.export_format, ExportFormat::Csv);
        assert_eq!(config.portal.reports_section, "Reports");
        assert!(config.download.clear_on_start);
        assert!(config.watch.partial_extensions.contains(&".crdownload".to_string()));
    }

    #[test]
    fn serde_round_trip_preserves_config() {
        let mut config = Config::default();
        config.portal.url = "https://portal.example.com".to_string();
        config.queue.task_timeout = Some(Duration::from_secs(120));
        config.watch.timeout = Duration::from_secs(60);

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.portal.url, config.portal.url);
        assert_eq!(back.queue.task_timeout, Some(Duration::from_secs(120)));
        assert_eq!(back.watch.timeout, Duration::from_secs(60));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{"portal": {"url": "https://p", "username": "u", "password": "s"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.portal.url, "https://p");
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.download.download_dir, PathBuf::from("./downloads"));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let config = Config::default();
        assert!(config.validate().is_err(), "empty URL must be rejected");

        let mut config = Config::default();
        config.portal.url = "https://p".to_string();
        config.watch.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.portal.url = "https://p".to_string();
        config.download.archive_dir = config.download.download_dir.clone();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.portal.url = "https://p".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_json_file_loads_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(
            &path,
            r#"{"portal": {"url": "https://p", "username": "u", "password": "s"}}"#,
        )
        .unwrap();
        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.portal.url, "https://p");

        // Fails validation: empty URL
        std::fs::write(&path, r#"{"portal": {"url": "", "username": "u", "password": "s"}}"#)
            .unwrap();
        assert!(Config::from_json_file(&path).is_err());
    }

    #[test]
    fn export_format_extension() {
        assert_eq!(ExportFormat::Csv.extension(), "csv");
        assert_eq!(ExportFormat::Xlsx.extension(), "xlsx");
        assert_eq!(ExportFormat::Csv.to_string(), "CSV");
    }
}
