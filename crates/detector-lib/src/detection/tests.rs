//! Tick-level scenarios for the detection loop

use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::{CollaboratorError, SinkError};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{IncidentRecord, OwnerRef, RawReplicaSetMetadata};
use crate::sink::IncidentSink;
use crate::source::{ErrorCountSource, ReplicaSetSource};
use crate::status::{StatusBoard, TickOutcomeKind};

/// ReplicaSet source returning a fixed snapshot
struct StaticReplicaSets {
    items: Mutex<Vec<RawReplicaSetMetadata>>,
    calls: AtomicUsize,
}

impl StaticReplicaSets {
    fn new(items: Vec<RawReplicaSetMetadata>) -> Self {
        Self {
            items: Mutex::new(items),
            calls: AtomicUsize::new(0),
        }
    }

    fn replace(&self, items: Vec<RawReplicaSetMetadata>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl ReplicaSetSource for StaticReplicaSets {
    async fn list_replica_sets(
        &self,
        _namespace: &str,
        _deployment: &str,
    ) -> Result<Vec<RawReplicaSetMetadata>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.lock().unwrap().clone())
    }
}

/// ReplicaSet source that never answers in time
struct HangingReplicaSets;

#[async_trait]
impl ReplicaSetSource for HangingReplicaSets {
    async fn list_replica_sets(
        &self,
        _namespace: &str,
        _deployment: &str,
    ) -> Result<Vec<RawReplicaSetMetadata>, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

/// Error count source replaying scripted responses, then zero
struct ScriptedErrorCounts {
    responses: Mutex<VecDeque<Result<u64, CollaboratorError>>>,
}

impl ScriptedErrorCounts {
    fn new(responses: Vec<Result<u64, CollaboratorError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl ErrorCountSource for ScriptedErrorCounts {
    async fn query_error_count(
        &self,
        _app_label: &str,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> Result<u64, CollaboratorError> {
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(0))
    }
}

/// Sink recording every delivered incident
struct RecordingSink {
    name: &'static str,
    fail: bool,
    delivered: Mutex<Vec<IncidentRecord>>,
}

impl RecordingSink {
    fn new(name: &'static str, fail: bool) -> Self {
        Self {
            name,
            fail,
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<IncidentRecord> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl IncidentSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, incident: &IncidentRecord) -> Result<(), SinkError> {
        self.delivered.lock().unwrap().push(incident.clone());
        if self.fail {
            return Err(SinkError::Delivery {
                sink: self.name,
                message: "webhook returned 500".to_string(),
            });
        }
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn replica_set(name: &str, created_at: DateTime<Utc>) -> RawReplicaSetMetadata {
    RawReplicaSetMetadata {
        name: Some(name.to_string()),
        revision_annotation: Some("2".to_string()),
        owners: vec![OwnerRef::deployment("payments-api")],
        created_at: Some(created_at),
    }
}

fn config() -> DetectionConfig {
    DetectionConfig {
        namespace: "demo-aiops".to_string(),
        deployment: "payments-api".to_string(),
        app_label: "payments-api".to_string(),
        poll_interval: Duration::from_millis(10),
        call_timeout: Duration::from_millis(200),
        rollout_window: Duration::from_secs(600),
        error_window: Duration::from_secs(120),
        error_threshold: NonZeroU64::new(5).unwrap(),
    }
}

fn unreachable_loki() -> CollaboratorError {
    CollaboratorError::Unreachable {
        source_name: "loki",
        message: "connection refused".to_string(),
    }
}

#[tokio::test]
async fn test_end_to_end_single_incident_per_revision() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-abc123", t0())]));
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(7), Ok(9)]));
    let sink = Arc::new(RecordingSink::new("stdout", false));

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets)
        .error_counts(counts)
        .sink(sink.clone())
        .build()
        .unwrap();

    let first = detection.tick(t0() + chrono::Duration::minutes(3)).await;
    let incident = match first {
        TickOutcome::Incident(incident) => incident,
        other => panic!("expected incident, got {:?}", other),
    };
    assert_eq!(incident.revision_id, "rs-abc123");
    assert_eq!(incident.error_count, 7);
    assert_eq!(incident.threshold, 5);

    let second = detection
        .tick(t0() + chrono::Duration::minutes(3) + chrono::Duration::seconds(20))
        .await;
    assert_eq!(second, TickOutcome::Quiet);

    assert_eq!(sink.delivered().len(), 1);
    assert!(detection.engine().ledger().contains("rs-abc123"));
}

#[tokio::test]
async fn test_log_backend_failure_preserves_ledger() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-1", t0())]));
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(8), Err(unreachable_loki())]));

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets)
        .error_counts(counts)
        .build()
        .unwrap();

    let now = t0() + chrono::Duration::minutes(1);
    assert!(matches!(detection.tick(now).await, TickOutcome::Incident(_)));
    let before = detection.engine().ledger().clone();

    let later = now + chrono::Duration::minutes(30);
    let outcome = detection.tick(later).await;

    assert!(matches!(outcome, TickOutcome::Skipped { ref source, .. } if source == "loki"));
    assert_eq!(detection.engine().ledger(), &before);
}

#[tokio::test]
async fn test_cluster_timeout_skips_tick() {
    let health = HealthRegistry::new();
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(50)]));

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(Arc::new(HangingReplicaSets))
        .error_counts(counts)
        .health_registry(health.clone())
        .build()
        .unwrap();

    let outcome = detection.tick(t0()).await;

    match outcome {
        TickOutcome::Skipped { source, reason } => {
            assert_eq!(source, "kubernetes");
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected skip, got {:?}", other),
    }
    assert!(detection.engine().ledger().is_empty());

    let report = health.health().await;
    assert_eq!(
        report.components[components::CLUSTER_API].status,
        ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_disabled_log_backend_never_reports() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-1", t0())]));
    let sink = Arc::new(RecordingSink::new("stdout", false));

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets.clone())
        .sink(sink.clone())
        .build()
        .unwrap();

    for i in 0..3 {
        let outcome = detection.tick(t0() + chrono::Duration::seconds(20 * i)).await;
        assert_eq!(outcome, TickOutcome::Quiet);
    }

    assert_eq!(replica_sets.calls.load(Ordering::SeqCst), 3);
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn test_sink_failure_does_not_reopen_revision() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-1", t0())]));
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(10), Ok(10)]));
    let slack = Arc::new(RecordingSink::new("slack", true));
    let stdout = Arc::new(RecordingSink::new("stdout", false));
    let status = StatusBoard::new();

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets)
        .error_counts(counts)
        .sink(stdout.clone())
        .sink(slack.clone())
        .status_board(status.clone())
        .build()
        .unwrap();

    let now = t0() + chrono::Duration::minutes(2);
    assert!(matches!(detection.tick(now).await, TickOutcome::Incident(_)));
    assert_eq!(
        detection.tick(now + chrono::Duration::seconds(20)).await,
        TickOutcome::Quiet
    );

    assert_eq!(stdout.delivered().len(), 1);
    assert_eq!(slack.delivered().len(), 1);

    let snapshot = status.snapshot().await;
    assert_eq!(snapshot.incidents_emitted, 1);
    assert_eq!(snapshot.last_delivery["stdout"], "sent");
    assert!(snapshot.last_delivery["slack"].starts_with("error:"));
}

#[tokio::test]
async fn test_status_tracks_last_tick() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![
        replica_set("rs-old", t0() - chrono::Duration::minutes(15)),
        replica_set("rs-new", t0() - chrono::Duration::minutes(1)),
    ]));
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(2)]));
    let status = StatusBoard::new();

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets)
        .error_counts(counts)
        .status_board(status.clone())
        .build()
        .unwrap();

    assert_eq!(detection.tick(t0()).await, TickOutcome::Quiet);

    let snapshot = status.snapshot().await;
    assert_eq!(snapshot.last_tick_at, Some(t0()));
    assert_eq!(snapshot.last_tick_outcome, Some(TickOutcomeKind::Quiet));
    assert_eq!(snapshot.last_evaluated_revision.as_deref(), Some("rs-new"));
    assert_eq!(snapshot.last_error_count, Some(2));
    assert_eq!(snapshot.incidents_emitted, 0);
}

#[tokio::test]
async fn test_new_rollout_after_incident_is_reported() {
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(6), Ok(6)]));
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-1", t0())]));

    let mut detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets.clone())
        .error_counts(counts)
        .build()
        .unwrap();

    assert!(matches!(
        detection.tick(t0() + chrono::Duration::minutes(1)).await,
        TickOutcome::Incident(_)
    ));

    replica_sets.replace(vec![
        replica_set("rs-1", t0()),
        replica_set("rs-2", t0() + chrono::Duration::minutes(2)),
    ]);

    match detection.tick(t0() + chrono::Duration::minutes(3)).await {
        TickOutcome::Incident(incident) => assert_eq!(incident.revision_id, "rs-2"),
        other => panic!("expected incident for rs-2, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_windows_do_not_panic() {
    let replica_sets = Arc::new(StaticReplicaSets::new(vec![replica_set("rs-abc123", t0())]));
    let counts = Arc::new(ScriptedErrorCounts::new(vec![Ok(7), Ok(7)]));

    let mut detection = DetectionLoopBuilder::new()
        .config(DetectionConfig {
            rollout_window: Duration::from_secs(60_000_000_000_000),
            error_window: Duration::from_secs(u64::MAX),
            ..config()
        })
        .replica_sets(replica_sets)
        .error_counts(counts)
        .build()
        .unwrap();

    let now = t0() + chrono::Duration::minutes(1);
    assert!(matches!(detection.tick(now).await, TickOutcome::Incident(_)));
    assert_eq!(detection.tick(now).await, TickOutcome::Quiet);
}

#[test]
fn test_default_config() {
    let config = DetectionConfig::default();
    assert_eq!(config.error_threshold.get(), 5);
    assert_eq!(config.poll_interval, Duration::from_secs(20));
    assert_eq!(config.rollout_window, Duration::from_secs(600));
}

#[tokio::test]
async fn test_builder_requires_replica_source() {
    let result = DetectionLoopBuilder::new().config(config()).build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_stops_on_cancellation() {
    let replica_sets = Arc::new(StaticReplicaSets::new(Vec::new()));
    let health = HealthRegistry::new();

    let detection = DetectionLoopBuilder::new()
        .config(config())
        .replica_sets(replica_sets.clone())
        .health_registry(health.clone())
        .build()
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(detection.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(health.readiness().await.ready);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert!(replica_sets.calls.load(Ordering::SeqCst) >= 1);
    assert!(!health.readiness().await.ready);
}
