//! Slack incoming-webhook notifier

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{async_trait, IncidentSink};
use crate::error::SinkError;
use crate::models::IncidentRecord;

const SINK_NAME: &str = "slack";

/// Slack webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackPayload {
    pub text: String,
}

/// Render the plain-text Slack message for an incident
pub fn format_slack_message(incident: &IncidentRecord) -> String {
    format!(
        "Deployment regression detected.\n\
         Signal: {}\n\
         Correlation to rollout: revision {} created at {}.\n\
         Impact: {}\n\
         Recommended action: {}",
        incident.signal,
        incident.revision_label(),
        incident.rollout_created_at.to_rfc3339(),
        incident.impact,
        incident.recommended_action_text()
    )
}

/// Posts incidents to a Slack incoming webhook
pub struct SlackNotifier {
    client: Client,
    webhook_url: Url,
}

impl SlackNotifier {
    /// Create a notifier for `webhook_url`
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let webhook_url = Url::parse(webhook_url).context("Invalid Slack webhook URL")?;

        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl IncidentSink for SlackNotifier {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn deliver(&self, incident: &IncidentRecord) -> Result<(), SinkError> {
        let payload = SlackPayload {
            text: format_slack_message(incident),
        };

        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Delivery {
                sink: SINK_NAME,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Delivery {
                sink: SINK_NAME,
                message: format!("HTTP {}: {}", status, body),
            });
        }

        debug!(incident_id = %incident.incident_id, "Posted incident to Slack");
        Ok(())
    }
}
