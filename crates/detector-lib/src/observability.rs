//! Observability infrastructure for the rollout detector
//!
//! Provides:
//! - Prometheus metrics (tick latency and outcomes, incidents, collaborator errors)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::IncidentRecord;

/// Histogram buckets for tick latency (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct DetectorMetricsInner {
    tick_latency_seconds: Histogram,
    ticks_total: IntCounterVec,
    incidents_emitted: IntCounter,
    collaborator_errors: IntCounterVec,
    sink_failures: IntCounterVec,
    last_error_count: IntGauge,
    ledger_entries: IntGauge,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "rollout_detector_tick_latency_seconds",
                "Time spent on one detection tick including collaborator calls",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks_total: register_int_counter_vec!(
                "rollout_detector_ticks_total",
                "Detection ticks by outcome",
                &["outcome"]
            )
            .expect("Failed to register ticks_total"),

            incidents_emitted: register_int_counter!(
                "rollout_detector_incidents_emitted_total",
                "Incidents emitted since process start"
            )
            .expect("Failed to register incidents_emitted"),

            collaborator_errors: register_int_counter_vec!(
                "rollout_detector_collaborator_errors_total",
                "Failed cluster or log backend calls",
                &["source"]
            )
            .expect("Failed to register collaborator_errors"),

            sink_failures: register_int_counter_vec!(
                "rollout_detector_sink_failures_total",
                "Failed incident deliveries",
                &["sink"]
            )
            .expect("Failed to register sink_failures"),

            last_error_count: register_int_gauge!(
                "rollout_detector_last_error_count",
                "Error line count observed on the last evaluated tick"
            )
            .expect("Failed to register last_error_count"),

            ledger_entries: register_int_gauge!(
                "rollout_detector_ledger_entries",
                "Revisions currently held in the dedup ledger"
            )
            .expect("Failed to register ledger_entries"),
        }
    }
}

/// Detector metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_ticks(&self, outcome: &str) {
        self.inner().ticks_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_incidents_emitted(&self) {
        self.inner().incidents_emitted.inc();
    }

    pub fn inc_collaborator_errors(&self, source: &str) {
        self.inner()
            .collaborator_errors
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_sink_failures(&self, sink: &str) {
        self.inner().sink_failures.with_label_values(&[sink]).inc();
    }

    pub fn set_last_error_count(&self, count: u64) {
        self.inner()
            .last_error_count
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn set_ledger_entries(&self, entries: usize) {
        self.inner()
            .ledger_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }
}

/// Structured logger for detector events
///
/// Provides consistent JSON-formatted logging for incidents, skipped ticks
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
    deployment: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }

    /// Log detector startup
    pub fn log_startup(&self, version: &str, spike_detection_enabled: bool, slack_enabled: bool) {
        info!(
            event = "detector_started",
            namespace = %self.namespace,
            deployment = %self.deployment,
            detector_version = %version,
            spike_detection_enabled = spike_detection_enabled,
            slack_enabled = slack_enabled,
            "Rollout detector started"
        );
    }

    /// Log detector shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "detector_shutdown",
            namespace = %self.namespace,
            deployment = %self.deployment,
            reason = %reason,
            "Rollout detector shutting down"
        );
    }

    /// Log a newly emitted incident
    pub fn log_incident(&self, incident: &IncidentRecord) {
        warn!(
            event = "incident_detected",
            namespace = %self.namespace,
            deployment = %self.deployment,
            incident_id = %incident.incident_id,
            revision = %incident.revision_id,
            rollout_created_at = %incident.rollout_created_at,
            error_count = incident.error_count,
            threshold = incident.threshold,
            "Error spike correlated with rollout"
        );
    }

    /// Log a tick skipped because a collaborator failed
    pub fn log_tick_skipped(&self, source: &str, error: &str) {
        warn!(
            event = "tick_skipped",
            namespace = %self.namespace,
            deployment = %self.deployment,
            source = %source,
            error = %error,
            "Collaborator call failed, skipping tick"
        );
    }

    /// Log the result of delivering an incident to a sink
    pub fn log_delivery(&self, sink: &str, incident_id: &str, error: Option<&str>) {
        match error {
            None => {
                info!(
                    event = "sink_delivered",
                    sink = %sink,
                    incident_id = %incident_id,
                    "Incident delivered"
                );
            }
            Some(error) => {
                warn!(
                    event = "sink_delivery_failed",
                    sink = %sink,
                    incident_id = %incident_id,
                    error = %error,
                    "Incident delivery failed"
                );
            }
        }
    }
}
