//! Detector library for rollout regressions
//!
//! This crate provides the core functionality for:
//! - Selecting the current rollout revision of a Deployment
//! - Classifying error log spikes
//! - Correlating both and deduplicating incidents per revision
//! - Kubernetes and Loki collaborators, stdout and Slack sinks
//! - Health, status and metrics for the HTTP surface

pub mod correlation;
pub mod detection;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod observer;
pub mod sink;
pub mod source;
pub mod status;

pub use correlation::{CorrelationEngine, DedupLedger};
pub use detection::{DetectionConfig, DetectionLoop, DetectionLoopBuilder, TickOutcome};
pub use error::{CollaboratorError, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DetectorMetrics, StructuredLogger};
pub use status::{StatusBoard, StatusSnapshot, TickOutcomeKind};
