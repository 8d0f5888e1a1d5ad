//! Detector configuration
//!
//! Read from the process environment at startup. Any invalid value is fatal.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::time::Duration;

use detector_lib::DetectionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Configuration errors; the process exits before the loop starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {key}")]
    Missing { key: &'static str },

    #[error("{key} must be a positive integer, got {value}")]
    NotPositive { key: &'static str, value: i64 },

    #[error("{key} must be at most {max}, got {value}")]
    TooLarge { key: &'static str, value: u64, max: u64 },

    #[error("{key} is not a valid URL: {message}")]
    InvalidUrl { key: &'static str, message: String },

    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
}

/// Upper bound for the rollout and error windows (one week)
const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound for the poll interval (one day)
const MAX_POLL_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Upper bound for a single collaborator call (one hour)
const MAX_HTTP_TIMEOUT_SECONDS: u64 = 60 * 60;

/// Environment variables as read, before validation
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    namespace: Option<String>,
    target_deployment: Option<String>,
    loki_url: Option<String>,
    loki_label_app: Option<String>,
    slack_webhook_url: Option<String>,

    #[serde(default = "default_error_threshold")]
    error_threshold: i64,

    #[serde(default = "default_rollout_window_minutes")]
    roll_out_window_minutes: i64,

    #[serde(default = "default_poll_interval_seconds")]
    poll_interval_seconds: i64,

    #[serde(default = "default_error_window_minutes")]
    error_window_minutes: i64,

    #[serde(default = "default_http_timeout_seconds")]
    http_timeout_seconds: i64,

    /// API server port for health/status/metrics
    #[serde(default = "default_api_port")]
    api_port: u16,
}

fn default_error_threshold() -> i64 {
    5
}

fn default_rollout_window_minutes() -> i64 {
    10
}

fn default_poll_interval_seconds() -> i64 {
    20
}

fn default_error_window_minutes() -> i64 {
    2
}

fn default_http_timeout_seconds() -> i64 {
    10
}

fn default_api_port() -> u16 {
    8080
}

/// Validated detector configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub namespace: String,
    pub target_deployment: String,
    /// Unset disables spike detection
    pub loki_url: Option<String>,
    pub loki_label_app: String,
    /// Unset disables the Slack sink
    pub slack_webhook_url: Option<String>,
    pub error_threshold: NonZeroU64,
    pub rollout_window: Duration,
    pub poll_interval: Duration,
    pub error_window: Duration,
    pub http_timeout: Duration,
    pub api_port: u16,
}

/// Non-secret view of the configuration for `/status`
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub namespace: String,
    pub target_deployment: String,
    pub error_threshold: u64,
    pub rollout_window_minutes: u64,
    pub poll_interval_seconds: u64,
    pub error_window_minutes: u64,
    pub loki_url: Option<String>,
    pub loki_label_app: String,
    pub slack_enabled: bool,
}

impl DetectorConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_source(config::Environment::default())
    }

    /// Load configuration from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(config::Environment::default().source(Some(vars)))
    }

    fn from_source(source: config::Environment) -> Result<Self, ConfigError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        let namespace = required(raw.namespace, "NAMESPACE")?;
        let target_deployment = required(raw.target_deployment, "TARGET_DEPLOYMENT")?;
        let loki_label_app = non_empty(raw.loki_label_app).unwrap_or_else(|| target_deployment.clone());

        let loki_url = optional_url(raw.loki_url, "LOKI_URL")?;
        let slack_webhook_url = optional_url(raw.slack_webhook_url, "SLACK_WEBHOOK_URL")?;

        let error_threshold = positive(raw.error_threshold, "ERROR_THRESHOLD")?;
        let rollout_window = minutes(
            raw.roll_out_window_minutes,
            "ROLL_OUT_WINDOW_MINUTES",
            MAX_WINDOW_MINUTES,
        )?;
        let error_window = minutes(
            raw.error_window_minutes,
            "ERROR_WINDOW_MINUTES",
            MAX_WINDOW_MINUTES,
        )?;
        let poll_interval = seconds(
            raw.poll_interval_seconds,
            "POLL_INTERVAL_SECONDS",
            MAX_POLL_INTERVAL_SECONDS,
        )?;
        let http_timeout = seconds(
            raw.http_timeout_seconds,
            "HTTP_TIMEOUT_SECONDS",
            MAX_HTTP_TIMEOUT_SECONDS,
        )?;

        Ok(Self {
            namespace,
            target_deployment,
            loki_url,
            loki_label_app,
            slack_webhook_url,
            error_threshold,
            rollout_window,
            poll_interval,
            error_window,
            http_timeout,
            api_port: raw.api_port,
        })
    }

    /// Settings for the detection loop
    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            namespace: self.namespace.clone(),
            deployment: self.target_deployment.clone(),
            app_label: self.loki_label_app.clone(),
            poll_interval: self.poll_interval,
            call_timeout: self.http_timeout,
            rollout_window: self.rollout_window,
            error_window: self.error_window,
            error_threshold: self.error_threshold,
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            namespace: self.namespace.clone(),
            target_deployment: self.target_deployment.clone(),
            error_threshold: self.error_threshold.get(),
            rollout_window_minutes: self.rollout_window.as_secs() / 60,
            poll_interval_seconds: self.poll_interval.as_secs(),
            error_window_minutes: self.error_window.as_secs() / 60,
            loki_url: self.loki_url.clone(),
            loki_label_app: self.loki_label_app.clone(),
            slack_enabled: self.slack_webhook_url.is_some(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing { key })
}

fn optional_url(value: Option<String>, key: &'static str) -> Result<Option<String>, ConfigError> {
    match non_empty(value) {
        Some(url) => {
            Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
                key,
                message: e.to_string(),
            })?;
            Ok(Some(url))
        }
        None => Ok(None),
    }
}

fn positive(value: i64, key: &'static str) -> Result<NonZeroU64, ConfigError> {
    u64::try_from(value)
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or(ConfigError::NotPositive { key, value })
}

fn bounded(value: i64, key: &'static str, max: u64) -> Result<u64, ConfigError> {
    let value = positive(value, key)?.get();
    if value > max {
        return Err(ConfigError::TooLarge { key, value, max });
    }
    Ok(value)
}

fn seconds(value: i64, key: &'static str, max: u64) -> Result<Duration, ConfigError> {
    bounded(value, key, max).map(Duration::from_secs)
}

fn minutes(value: i64, key: &'static str, max: u64) -> Result<Duration, ConfigError> {
    let minutes = bounded(value, key, max)?;
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or(ConfigError::TooLarge { key, value: minutes, max })
}
