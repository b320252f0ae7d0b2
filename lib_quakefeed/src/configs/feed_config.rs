//! # Feed Configuration
//!
//! Every tunable of the engine in one serde struct. Unknown keys are
//! rejected so that a typo in a config file does not silently fall back to
//! a default.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::reconciler::{CollisionPolicy, Reconciler};
use crate::core::supervisor::RetryPolicy;
use crate::error::FeedError;

/// Why a configuration cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("base URL `{0}` is not an absolute http(s) URL")]
    BadUrl(String),

    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl From<ConfigError> for FeedError {
    fn from(e: ConfigError) -> Self {
        FeedError::Config(e.to_string())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Absolute base URL of the events service.
    pub base_url: String,
    /// Paginated events, relative to `base_url`.
    pub events_path: String,
    /// Filtered events.
    pub filter_path: String,
    /// Server-sent event stream.
    pub stream_path: String,
    /// Reports root.
    pub reports_path: String,
    /// SSE event name carrying event batches.
    pub stream_event: String,
    /// Working set capacity.
    pub capacity: usize,
    /// Id collision rule for merges.
    pub collision_policy: CollisionPolicy,
    /// Stream reconnect policy.
    pub retry: RetryPolicy,
    /// Seconds between periodic full refreshes.
    pub refresh_interval_secs: u64,
    /// Seconds before a full fetch is abandoned.
    pub fetch_timeout_secs: u64,
    /// Retries of transient HTTP failures inside one fetch.
    pub http_retries: u32,
    /// IANA timezone filters are expressed in.
    pub timezone: String,
    /// Magnitude at or above which live events raise an alert.
    pub alert_threshold: f64,
    /// Opaque device identifier forwarded as a header.
    pub device_id: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            events_path: "api/events".to_string(),
            filter_path: "api/events/filter".to_string(),
            stream_path: "api/events/stream".to_string(),
            reports_path: "api/reports".to_string(),
            stream_event: "new-events".to_string(),
            capacity: 100,
            collision_policy: CollisionPolicy::NewerOrEqual,
            retry: RetryPolicy::default(),
            refresh_interval_secs: 180,
            fetch_timeout_secs: 30,
            http_retries: 3,
            timezone: "America/Mexico_City".to_string(),
            alert_threshold: 5.5,
            device_id: None,
        }
    }
}

impl FeedConfig {
    /// Reads a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: shown.clone(), source })?;
        let config: FeedConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json { path: shown, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field that has a validity rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base()?;
        self.zone()?;
        if self.capacity == 0 {
            return Err(ConfigError::Zero("capacity"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.maxAttempts"));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Zero("refreshIntervalSecs"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero("fetchTimeoutSecs"));
        }
        Ok(())
    }

    fn base(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url).map_err(|_| ConfigError::BadUrl(self.base_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::BadUrl(self.base_url.clone()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Absolute URL of a path relative to `base_url`.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.base()?
            .join(path)
            .map_err(|_| ConfigError::BadUrl(format!("{}{}", self.base_url, path)))
    }

    /// The filter timezone.
    pub fn zone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// A reconciler with the configured capacity and collision rule.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.capacity, self.collision_policy)
    }

    /// Periodic refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Full fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl fmt::Display for FeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeedConfig
    Base URL: {},
    Stream: {} (event `{}`),
    Capacity: {} ({:?}),
    Retry: {} attempts, {:?} base, {:?},
    Refresh: every {}s, timeout {}s,
    Timezone: {},
    Alert threshold: {}
",
            self.base_url,
            self.stream_path,
            self.stream_event,
            self.capacity,
            self.collision_policy,
            self.retry.max_attempts,
            self.retry.base_delay,
            self.retry.backoff,
            self.refresh_interval_secs,
            self.fetch_timeout_secs,
            self.timezone,
            self.alert_threshold
        )
    }
}
