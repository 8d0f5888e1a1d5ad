//! Last-known detector status published for `/status`
//!
//! The detection loop is the only writer. Readers get a cloned snapshot and
//! never see the dedup ledger itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::IncidentRecord;

/// How the last tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickOutcomeKind {
    /// Observations evaluated, nothing to report
    Quiet,
    /// A new incident was emitted
    Incident,
    /// A collaborator failed; no evaluation happened
    Skipped,
}

impl TickOutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcomeKind::Quiet => "quiet",
            TickOutcomeKind::Incident => "incident",
            TickOutcomeKind::Skipped => "skipped",
        }
    }
}

/// Point-in-time view of the detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_tick_outcome: Option<TickOutcomeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_skip_reason: Option<String>,
    pub last_evaluated_revision: Option<String>,
    pub last_rollout_created_at: Option<DateTime<Utc>>,
    pub last_error_count: Option<u64>,
    pub incidents_emitted: u64,
    pub last_incident: Option<IncidentRecord>,
    /// Per-sink result of the last delivery attempt
    pub last_delivery: HashMap<String, String>,
}

/// Shared handle to the published snapshot
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the current snapshot
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    /// Record a tick that skipped evaluation
    pub async fn record_skip(&self, at: DateTime<Utc>, reason: impl Into<String>) {
        let mut status = self.inner.write().await;
        status.last_tick_at = Some(at);
        status.last_tick_outcome = Some(TickOutcomeKind::Skipped);
        status.last_skip_reason = Some(reason.into());
    }

    /// Record an evaluated tick
    pub async fn record_evaluation(
        &self,
        at: DateTime<Utc>,
        revision: Option<(&str, DateTime<Utc>)>,
        error_count: u64,
        incident: Option<&IncidentRecord>,
    ) {
        let mut status = self.inner.write().await;
        status.last_tick_at = Some(at);
        status.last_skip_reason = None;
        status.last_error_count = Some(error_count);
        status.last_evaluated_revision = revision.map(|(id, _)| id.to_string());
        if let Some((_, created_at)) = revision {
            status.last_rollout_created_at = Some(created_at);
        }

        match incident {
            Some(incident) => {
                status.last_tick_outcome = Some(TickOutcomeKind::Incident);
                status.incidents_emitted += 1;
                status.last_incident = Some(incident.clone());
            }
            None => status.last_tick_outcome = Some(TickOutcomeKind::Quiet),
        }
    }

    /// Record the result of delivering an incident to `sink`
    pub async fn record_delivery(&self, sink: &str, result: impl Into<String>) {
        let mut status = self.inner.write().await;
        status.last_delivery.insert(sink.to_string(), result.into());
    }
}
