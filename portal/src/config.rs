//! Configuration management for the portal engine.
//!
//! Values come from an optional TOML file, then `CLOUDSYNC_*` environment
//! variables, with sensible defaults for everything.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`PortalConfig`]
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment variable holds an unusable value
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// API origin, e.g. `https://portal.example.org`
    pub base_url: String,
    /// Requests in flight at once
    pub max_concurrent_requests: usize,
    /// Wait before re-dispatching a request that failed with 503
    pub retry_delay_secs: u64,
    /// Delay between polls of a transitioning item
    pub poll_interval_secs: u64,
    /// Per-request timeout; `None` leaves it to the transport
    pub request_timeout_secs: Option<u64>,
    /// Prometheus exporter address; `None` disables it
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            max_concurrent_requests: cloudsync_runtime::dispatcher::DEFAULT_MAX_CONCURRENT,
            retry_delay_secs: cloudsync_runtime::DEFAULT_RETRY_DELAY.as_secs(),
            poll_interval_secs: 5,
            request_timeout_secs: None,
            metrics_addr: None,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl PortalConfig {
    /// Defaults overridden by the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Read a TOML file, then apply the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// variable cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)?.with_env(|key| std::env::var(key).ok())
    }

    /// Parse a TOML document; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `CLOUDSYNC_*` overrides found through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("CLOUDSYNC_BASE_URL") {
            self.base_url = value;
        }
        if let Some(value) = lookup("CLOUDSYNC_MAX_CONCURRENT") {
            self.max_concurrent_requests = parse("CLOUDSYNC_MAX_CONCURRENT", value)?;
        }
        if let Some(value) = lookup("CLOUDSYNC_RETRY_DELAY_SECS") {
            self.retry_delay_secs = parse("CLOUDSYNC_RETRY_DELAY_SECS", value)?;
        }
        if let Some(value) = lookup("CLOUDSYNC_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse("CLOUDSYNC_POLL_INTERVAL_SECS", value)?;
        }
        if let Some(value) = lookup("CLOUDSYNC_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = Some(parse("CLOUDSYNC_REQUEST_TIMEOUT_SECS", value)?);
        }
        if let Some(value) = lookup("CLOUDSYNC_METRICS_ADDR") {
            self.metrics_addr = Some(parse("CLOUDSYNC_METRICS_ADDR", value)?);
        }
        Ok(self)
    }

    /// Set the API origin
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the number of concurrent requests
    #[must_use]
    pub const fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set the 503 retry delay
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = delay.as_secs();
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_secs = match timeout {
            Some(timeout) => Some(timeout.as_secs()),
            None => None,
        };
        self
    }

    /// Enable the Prometheus exporter
    #[must_use]
    pub const fn with_metrics_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.metrics_addr = addr;
        self
    }

    /// 503 retry delay
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Poll interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
