//! Correlation of rollouts with error spikes
//!
//! Decides whether an error spike is attributable to the current rollout and
//! whether that rollout was already reported. Each revision moves one way from
//! unreported to reported; there is no resolution transition.

mod ledger;

pub use ledger::DedupLedger;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{IncidentRecord, LogSpikeObservation, RecommendedAction, RolloutRevision};
use crate::observer::window_start;

/// Default ledger retention (20 minutes, twice the default rollout window)
const DEFAULT_RETENTION_SECS: u64 = 20 * 60;

/// Correlation engine owning the dedup ledger
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    namespace: String,
    deployment: String,
    /// Ledger entries older than this are evicted on evaluation
    retention: Duration,
    ledger: DedupLedger,
}

impl CorrelationEngine {
    /// Create an engine for the deployment `namespace/deployment`
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            ledger: DedupLedger::new(),
        }
    }

    /// Set ledger retention. Must not be shorter than the rollout window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Read-only view of the ledger
    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Evaluate one tick's observations
    ///
    /// # Returns
    /// * `Some(IncidentRecord)` the first time a revision coincides with a spike
    /// * `None` without a rollout, without a spike, or if already reported
    pub fn evaluate(
        &mut self,
        revision: Option<&RolloutRevision>,
        spike: &LogSpikeObservation,
        now: DateTime<Utc>,
    ) -> Option<IncidentRecord> {
        let evicted = self
            .ledger
            .evict_reported_before(window_start(now, self.retention));
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted expired ledger entries");
        }

        let revision = revision?;

        if !spike.threshold_exceeded {
            return None;
        }

        if self.ledger.contains(&revision.revision_id) {
            debug!(revision = %revision.revision_id, "Revision already reported");
            return None;
        }

        let incident = self.build_incident(revision, spike, now);
        self.ledger.record(&revision.revision_id, now);
        Some(incident)
    }

    fn build_incident(
        &self,
        revision: &RolloutRevision,
        spike: &LogSpikeObservation,
        now: DateTime<Utc>,
    ) -> IncidentRecord {
        let window_minutes = spike.window_minutes();

        IncidentRecord {
            incident_id: format!(
                "{}:{}:{}",
                self.namespace, self.deployment, revision.revision_id
            ),
            namespace: self.namespace.clone(),
            deployment: self.deployment.clone(),
            revision_id: revision.revision_id.clone(),
            revision_number: revision.revision_number.clone(),
            rollout_created_at: revision.created_at,
            detected_at: now,
            signal: format!(
                "Error logs spiked to {} in the last {} minutes while a new rollout was detected.",
                spike.error_count, window_minutes
            ),
            impact: format!(
                "Customers may be seeing failures from {} (HTTP 500 / exceptions).",
                self.deployment
            ),
            error_count: spike.error_count,
            threshold: spike.threshold,
            error_window_minutes: window_minutes,
            recommended_action: RecommendedAction::Rollback,
        }
    }
}
