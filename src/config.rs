//! Configuration types for satfetch
//!
//! The crate never reads a configuration file itself. Callers build a [`Config`]
//! (or deserialize one from whatever format they use) and hand it to the engines,
//! the coordinator and the harvester at construction time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig): destination directory, manifest, batch order
/// - [`retry`](RetryPolicy): attempts, stall and connection timeouts
/// - [`http`](HttpConfig): client identity and TLS behavior
/// - [`ftp`](FtpConfig): anonymous credentials
/// - [`harvest`](HarvestConfig): listen directory and delivery timeouts
/// - [`orders`](OrderConfig): order status markers
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download destination settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy shared by both transfer engines
    #[serde(default)]
    pub retry: RetryPolicy,

    /// HTTP engine settings
    #[serde(default)]
    pub http: HttpConfig,

    /// FTP engine settings
    #[serde(default)]
    pub ftp: FtpConfig,

    /// Result harvester settings
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Order status gate settings
    #[serde(default)]
    pub orders: OrderConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &Path {
        &self.download.download_dir
    }

    /// Check the configuration for values the engines cannot work with
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if self.retry.idle_timeout.is_zero() {
            return Err(config_error(
                "idle_timeout must be greater than zero",
                "retry.idle_timeout",
            ));
        }
        if self.retry.connect_timeout.is_zero() {
            return Err(config_error(
                "connect_timeout must be greater than zero",
                "retry.connect_timeout",
            ));
        }
        if self.harvest.timeout.is_zero() {
            return Err(config_error(
                "harvest timeout must be greater than zero",
                "harvest.timeout",
            ));
        }
        if self.harvest.poll_interval.is_zero() {
            return Err(config_error(
                "poll_interval must be greater than zero",
                "harvest.poll_interval",
            ));
        }
        if self.download.failure_manifest.trim().is_empty() {
            return Err(config_error(
                "failure manifest name must not be empty",
                "download.failure_manifest",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Download destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory product files are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// File name of the failure manifest written next to the downloads
    /// (default: "failed_downloads.txt")
    #[serde(default = "default_failure_manifest")]
    pub failure_manifest: String,

    /// Which protocol batch goes first when links are dispatched together
    #[serde(default)]
    pub batch_order: BatchOrder,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            failure_manifest: default_failure_manifest(),
            batch_order: BatchOrder::default(),
        }
    }
}

/// Order in which extracted link batches are dispatched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrder {
    /// All HTTP links, then all FTP links (default)
    #[default]
    HttpFirst,
    /// All FTP links, then all HTTP links
    FtpFirst,
}

/// Retry configuration for a single transfer
///
/// `max_attempts` counts every attempt, including the first one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts per transfer (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cancel an attempt when no data arrives for this long (default: 60 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Connection establishment timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Delay before retrying after a generic failure (default: 3 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Delay before retrying after a stall (default: 5 seconds)
    #[serde(default = "default_stall_retry_delay", with = "duration_serde")]
    pub stall_retry_delay: Duration,

    /// Add random jitter to retry delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Accepted difference between declared and written size (default: 1024 bytes)
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            idle_timeout: default_idle_timeout(),
            connect_timeout: default_connect_timeout(),
            retry_delay: default_retry_delay(),
            stall_retry_delay: default_stall_retry_delay(),
            jitter: false,
            size_tolerance: default_size_tolerance(),
        }
    }
}

/// HTTP engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent sent with every request (a desktop browser string by default)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Skip certificate verification (default: true, the portal's certificate
    /// does not match its host name)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    /// Retry once with a verifying client when the TLS handshake fails (default: true)
    #[serde(default = "default_true")]
    pub tls_fallback: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_invalid_certs: true,
            tls_fallback: true,
        }
    }
}

/// FTP engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FtpConfig {
    /// User name when the URL carries no credentials (default: "anonymous")
    #[serde(default = "default_anonymous_user")]
    pub anonymous_user: String,

    /// Password when the URL carries no credentials (default: empty)
    #[serde(default)]
    pub anonymous_password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            anonymous_user: default_anonymous_user(),
            anonymous_password: String::new(),
        }
    }
}

/// Result harvester configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Directory the browser saves downloads into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub listen_dir: PathBuf,

    /// How long to wait for a delivery after triggering (default: 30 seconds)
    #[serde(default = "default_harvest_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// How often the browser window set is polled (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Pause before reading a freshly created text file (default: 100 ms)
    #[serde(default = "default_file_settle", with = "duration_serde")]
    pub file_settle: Duration,

    /// Extensions of in-progress browser downloads
    #[serde(default = "default_temp_extensions")]
    pub temp_extensions: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            listen_dir: default_download_dir(),
            timeout: default_harvest_timeout(),
            poll_interval: default_poll_interval(),
            file_settle: default_file_settle(),
            temp_extensions: default_temp_extensions(),
        }
    }
}

/// Order status gate configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderConfig {
    /// Status texts meaning "not ready yet" (default: the portal's "preparing")
    #[serde(default = "default_pending_statuses")]
    pub pending_statuses: Vec<String>,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            pending_statuses: default_pending_statuses(),
        }
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_failure_manifest() -> String {
    "failed_downloads.txt".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_stall_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_size_tolerance() -> u64 {
    1024
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_anonymous_user() -> String {
    "anonymous".to_string()
}

fn default_harvest_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_file_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_temp_extensions() -> Vec<String> {
    vec!["tmp".into(), "crdownload".into(), "part".into()]
}

fn default_pending_statuses() -> Vec<String> {
    vec!["准备中".into()]
}

// Duration serialization helper (fractional seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
