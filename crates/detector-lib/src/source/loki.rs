//! Error line counts from Loki
//!
//! Runs a `count_over_time` range query over the trailing window and reads
//! the most recent sample of the first series.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{async_trait, ErrorCountSource};
use crate::error::CollaboratorError;

const SOURCE_NAME: &str = "loki";

/// Line filter applied to the application's log stream
const ERROR_LINE_FILTER: &str = "(?i)(500|exception|error)";

/// Resolution of the range query
const QUERY_STEP: &str = "30s";

/// Build the LogQL query counting error lines over `window_seconds`
pub fn build_error_query(namespace: &str, app_label: &str, window_seconds: i64) -> String {
    format!(
        "sum(count_over_time({{namespace=\"{}\",app=\"{}\"}} |~ \"{}\" [{}s]))",
        namespace, app_label, ERROR_LINE_FILTER, window_seconds
    )
}

/// Loki-backed error count source scoped to one namespace
pub struct LokiErrorCountSource {
    client: Client,
    query_range_url: String,
    namespace: String,
    timeout: Duration,
}

impl LokiErrorCountSource {
    /// Create a source for the Loki instance at `base_url`
    pub fn new(base_url: &str, namespace: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Url::parse(base_url).context("Invalid Loki URL")?;
        let query_range_url = format!("{}/loki/api/v1/query_range", base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            query_range_url,
            namespace: namespace.into(),
            timeout,
        })
    }
}

#[async_trait]
impl ErrorCountSource for LokiErrorCountSource {
    async fn query_error_count(
        &self,
        app_label: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u64, CollaboratorError> {
        let window_seconds = (window_end - window_start).num_seconds().max(1);
        let query = build_error_query(&self.namespace, app_label, window_seconds);
        let start = window_start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = window_end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let response = self
            .client
            .get(&self.query_range_url)
            .query(&[
                ("query", query.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", QUERY_STEP),
            ])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Unreachable {
                source_name: SOURCE_NAME,
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body: QueryRangeResponse =
            response
                .json()
                .await
                .map_err(|e| CollaboratorError::Malformed {
                    source_name: SOURCE_NAME,
                    message: e.to_string(),
                })?;

        let count = latest_count(&body)?;
        debug!(app = %app_label, error_count = count, "Queried Loki error count");
        Ok(count)
    }
}

impl LokiErrorCountSource {
    fn request_error(&self, e: reqwest::Error) -> CollaboratorError {
        if e.is_timeout() {
            CollaboratorError::Timeout {
                source_name: SOURCE_NAME,
                timeout: self.timeout,
            }
        } else {
            CollaboratorError::Unreachable {
                source_name: SOURCE_NAME,
                message: e.to_string(),
            }
        }
    }
}

/// Extract the latest sample of the first series; no series means zero
fn latest_count(body: &QueryRangeResponse) -> Result<u64, CollaboratorError> {
    let Some(series) = body.data.result.first() else {
        return Ok(0);
    };
    let Some((_, raw)) = series.values.last() else {
        return Ok(0);
    };

    let value: f64 = raw.parse().map_err(|_| CollaboratorError::Malformed {
        source_name: SOURCE_NAME,
        message: format!("non-numeric sample value {:?}", raw),
    })?;

    if !value.is_finite() || value < 0.0 {
        return Err(CollaboratorError::Malformed {
            source_name: SOURCE_NAME,
            message: format!("invalid sample value {}", value),
        });
    }

    Ok(value.floor() as u64)
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    data: QueryRangeData,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<QueryRangeSeries>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeSeries {
    #[serde(default)]
    values: Vec<(serde_json::Value, String)>,
}
