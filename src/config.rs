//! Configuration types for cfdi-reporter

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How results are split into pages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Documents per page; every page but the last is full (default: 20)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// How the service polls a portal that is still matching documents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between polls while the portal answers "pending" (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Give up (status FALLO) after this many pending answers (default: 120)
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`SatDownloader`](crate::SatDownloader)
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Result paging
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Portal polling while a request is pending
    #[serde(default)]
    pub polling: PollingConfig,

    /// Backoff for transient portal failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Queries driven against the portal at the same time (default: 4)
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// Parallel XML downloads per query (default: 8)
    #[serde(default = "default_xml_concurrency")]
    pub xml_concurrency: usize,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pagination: PaginationConfig::default(),
            polling: PollingConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_queries: default_max_concurrent_queries(),
            xml_concurrency: default_xml_concurrency(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Config {
    /// Load a JSON config file; missing fields take their defaults
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pagination.page_size == 0 {
            return Err(config_error("page size must be at least 1", "pagination.page_size"));
        }
        if self.polling.max_polls == 0 {
            return Err(config_error("max_polls must be at least 1", "polling.max_polls"));
        }
        if self.max_concurrent_queries == 0 {
            return Err(config_error(
                "at least one concurrent query is required",
                "max_concurrent_queries",
            ));
        }
        if self.xml_concurrency == 0 {
            return Err(config_error(
                "XML concurrency must be at least 1",
                "xml_concurrency",
            ));
        }
        if self.event_buffer == 0 {
            return Err(config_error("event buffer cannot be empty", "event_buffer"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            return Err(config_error(
                "backoff multiplier must be between 1.0 and 100.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

/// Largest accepted `retry.backoff_multiplier`
const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_page_size() -> u32 {
    20
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_polls() -> u32 {
    120
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_queries() -> usize {
    4
}

fn default_xml_concurrency() -> usize {
    8
}

fn default_event_buffer() -> usize {
    1000
}

// Durations are stored as whole seconds
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
