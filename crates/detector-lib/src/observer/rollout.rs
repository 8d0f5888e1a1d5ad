//! Rollout revision selection
//!
//! Picks the most recently created ReplicaSet of the target Deployment that
//! was created inside the trailing rollout window.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::window_start;
use crate::models::{RawReplicaSetMetadata, RolloutRevision};

/// Default rollout window (10 minutes)
const DEFAULT_ROLLOUT_WINDOW_SECS: u64 = 10 * 60;

/// Derives the current rollout revision of a single Deployment
#[derive(Debug, Clone)]
pub struct RolloutObserver {
    /// Deployment whose ReplicaSets are considered
    pub deployment: String,
    /// How far back a ReplicaSet creation still counts as an active rollout
    pub rollout_window: Duration,
}

impl RolloutObserver {
    /// Create an observer with the default 10-minute window
    pub fn new(deployment: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            rollout_window: Duration::from_secs(DEFAULT_ROLLOUT_WINDOW_SECS),
        }
    }

    /// Set custom rollout window
    pub fn with_rollout_window(mut self, window: Duration) -> Self {
        self.rollout_window = window;
        self
    }

    /// Select the current rollout revision from a ReplicaSet snapshot
    ///
    /// # Arguments
    /// * `replica_sets` - ReplicaSets listed in the target namespace
    /// * `now` - Evaluation time; the window is `[now - rollout_window, now]`
    ///
    /// # Returns
    /// * `Some(RolloutRevision)` for the newest owned ReplicaSet in the window
    /// * `None` when no rollout is active
    pub fn observe_current_revision(
        &self,
        replica_sets: &[RawReplicaSetMetadata],
        now: DateTime<Utc>,
    ) -> Option<RolloutRevision> {
        let earliest = window_start(now, self.rollout_window);

        replica_sets
            .iter()
            .filter(|rs| rs.is_owned_by(&self.deployment))
            .filter_map(|rs| {
                let name = rs.name.as_ref()?;
                let created_at = rs.created_at?;
                if created_at < earliest || created_at > now {
                    return None;
                }
                Some(RolloutRevision {
                    revision_id: name.clone(),
                    revision_number: rs.revision_annotation.clone(),
                    created_at,
                })
            })
            // Ties on created_at go to the lexicographically greatest name
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.revision_id.cmp(&b.revision_id))
            })
    }
}
