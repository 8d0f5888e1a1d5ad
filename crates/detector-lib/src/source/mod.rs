//! Collaborators that feed observations into the detection loop
//!
//! This module provides:
//! - ReplicaSet listing from the Kubernetes API
//! - Error line counts from Loki

mod kubernetes;
mod loki;

pub use kubernetes::{raw_metadata, KubeReplicaSetSource};
pub use loki::{build_error_query, LokiErrorCountSource};

use chrono::{DateTime, Utc};

use crate::error::CollaboratorError;
use crate::models::RawReplicaSetMetadata;

pub use async_trait::async_trait;

/// Source of ReplicaSet metadata for one namespace
#[async_trait]
pub trait ReplicaSetSource: Send + Sync {
    /// List ReplicaSets of `deployment` in `namespace`
    async fn list_replica_sets(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Vec<RawReplicaSetMetadata>, CollaboratorError>;
}

/// Source of error line counts
#[async_trait]
pub trait ErrorCountSource: Send + Sync {
    /// Count error lines for pods labelled `app_label` in `[window_start, window_end]`
    async fn query_error_count(
        &self,
        app_label: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<u64, CollaboratorError>;
}
