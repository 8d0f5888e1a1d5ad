//! Core data models for the rollout detector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Annotation the Deployment controller stamps on every ReplicaSet it creates
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Owner reference of a ReplicaSet, reduced to what ownership checks need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            kind: "Deployment".to_string(),
            name: name.into(),
        }
    }
}

/// ReplicaSet metadata as returned by the cluster metadata source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReplicaSetMetadata {
    pub name: Option<String>,
    pub revision_annotation: Option<String>,
    pub owners: Vec<OwnerRef>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RawReplicaSetMetadata {
    /// Returns true if a `Deployment` owner reference names `deployment`
    pub fn is_owned_by(&self, deployment: &str) -> bool {
        self.owners
            .iter()
            .any(|owner| owner.kind == "Deployment" && owner.name == deployment)
    }
}

/// One rollout attempt, identified by its ReplicaSet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutRevision {
    /// ReplicaSet name, unique per rollout
    pub revision_id: String,
    /// Value of the `deployment.kubernetes.io/revision` annotation, if any
    pub revision_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Error count classification for one trailing window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSpikeObservation {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub error_count: u64,
    pub threshold: u64,
    pub threshold_exceeded: bool,
}

impl LogSpikeObservation {
    /// Length of the measurement window in whole minutes
    pub fn window_minutes(&self) -> i64 {
        (self.window_end - self.window_start).num_minutes()
    }
}

/// Advisory attached to every incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Rollback,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendedAction::Rollback => write!(f, "rollback"),
        }
    }
}

/// A detected correlation between a rollout revision and an error spike.
///
/// Built once by the correlation engine and never mutated afterwards; sinks
/// receive it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub incident_id: String,
    pub namespace: String,
    pub deployment: String,
    pub revision_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_number: Option<String>,
    pub rollout_created_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub signal: String,
    pub impact: String,
    pub error_count: u64,
    pub threshold: u64,
    pub error_window_minutes: i64,
    pub recommended_action: RecommendedAction,
}

impl IncidentRecord {
    /// Human-readable advisory for notification channels
    pub fn recommended_action_text(&self) -> String {
        match self.recommended_action {
            RecommendedAction::Rollback => format!(
                "Rollback deployment {} to the previous revision.",
                self.deployment
            ),
        }
    }

    /// Revision label for messages, preferring the controller's revision number
    pub fn revision_label(&self) -> String {
        match &self.revision_number {
            Some(number) => format!("{} ({})", number, self.revision_id),
            None => self.revision_id.clone(),
        }
    }
}
