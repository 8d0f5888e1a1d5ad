//! Detection loop
//!
//! Implements the polling loop that correlates rollouts with error spikes on
//! a fixed interval until cancelled.

use std::future::Future;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::correlation::CorrelationEngine;
use crate::error::CollaboratorError;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{IncidentRecord, RawReplicaSetMetadata};
use crate::observability::{DetectorMetrics, StructuredLogger};
use crate::observer::{LogSpikeObserver, RolloutObserver};
use crate::sink::IncidentSink;
use crate::source::{ErrorCountSource, ReplicaSetSource};
use crate::status::{StatusBoard, TickOutcomeKind};

/// Default minimum error count that is a spike
const DEFAULT_ERROR_THRESHOLD: NonZeroU64 = match NonZeroU64::new(5) {
    Some(threshold) => threshold,
    None => unreachable!(),
};

/// Configuration for the detection loop
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub namespace: String,
    pub deployment: String,
    /// `app` label of the deployment's pods in the log backend
    pub app_label: String,
    /// Time between ticks (default: 20 seconds)
    pub poll_interval: Duration,
    /// Upper bound for each collaborator call (default: 10 seconds)
    pub call_timeout: Duration,
    /// How long a new ReplicaSet counts as an active rollout (default: 10 minutes)
    pub rollout_window: Duration,
    /// Trailing window for error counts (default: 2 minutes)
    pub error_window: Duration,
    /// Minimum error count that is a spike (default: 5)
    pub error_threshold: NonZeroU64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            deployment: String::new(),
            app_label: String::new(),
            poll_interval: Duration::from_secs(20),
            call_timeout: Duration::from_secs(10),
            rollout_window: Duration::from_secs(10 * 60),
            error_window: Duration::from_secs(2 * 60),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Observations evaluated, nothing new to report
    Quiet,
    /// A new incident was emitted
    Incident(IncidentRecord),
    /// A collaborator failed and evaluation was skipped
    Skipped { source: String, reason: String },
}

impl TickOutcome {
    pub fn kind(&self) -> TickOutcomeKind {
        match self {
            TickOutcome::Quiet => TickOutcomeKind::Quiet,
            TickOutcome::Incident(_) => TickOutcomeKind::Incident,
            TickOutcome::Skipped { .. } => TickOutcomeKind::Skipped,
        }
    }
}

/// Polling loop feeding the correlation engine
pub struct DetectionLoop {
    config: DetectionConfig,
    replica_sets: Arc<dyn ReplicaSetSource>,
    /// `None` when no log backend is configured; spikes are then never seen
    error_counts: Option<Arc<dyn ErrorCountSource>>,
    sinks: Vec<Arc<dyn IncidentSink>>,
    rollout_observer: RolloutObserver,
    spike_observer: LogSpikeObserver,
    engine: CorrelationEngine,
    status: StatusBoard,
    health: HealthRegistry,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
}

impl DetectionLoop {
    /// Create a new detection loop
    pub fn new(
        config: DetectionConfig,
        replica_sets: Arc<dyn ReplicaSetSource>,
        error_counts: Option<Arc<dyn ErrorCountSource>>,
    ) -> Self {
        let rollout_observer = RolloutObserver::new(config.deployment.clone())
            .with_rollout_window(config.rollout_window);
        let spike_observer =
            LogSpikeObserver::new(config.error_threshold).with_window(config.error_window);
        // Anything reported longer ago than this can no longer be selected
        let engine = CorrelationEngine::new(config.namespace.clone(), config.deployment.clone())
            .with_retention(config.rollout_window.saturating_mul(2));
        let logger = StructuredLogger::new(config.namespace.clone(), config.deployment.clone());

        Self {
            config,
            replica_sets,
            error_counts,
            sinks: Vec::new(),
            rollout_observer,
            spike_observer,
            engine,
            status: StatusBoard::new(),
            health: HealthRegistry::new(),
            metrics: DetectorMetrics::new(),
            logger,
        }
    }

    /// Correlation engine and its ledger, read-only
    pub fn engine(&self) -> &CorrelationEngine {
        &self.engine
    }

    /// Handle to the published status snapshot
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Run ticks every `poll_interval` until `shutdown` is cancelled
    ///
    /// A tick in progress always completes; cancellation is observed between
    /// ticks.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            namespace = %self.config.namespace,
            deployment = %self.config.deployment,
            "Starting detection loop"
        );

        self.health.set_ready(true).await;

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutting down detection loop");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.tick(Utc::now()).await;
                    debug!(outcome = outcome.kind().as_str(), "Tick complete");
                }
            }
        }

        self.health.set_ready(false).await;
    }

    /// Execute one tick as of `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let start = Instant::now();

        let outcome = match self.observe(now).await {
            Ok((replica_sets, error_count)) => self.evaluate(&replica_sets, error_count, now).await,
            Err(err) => {
                let source = err.source_name().to_string();
                let reason = err.to_string();
                self.metrics.inc_collaborator_errors(&source);
                self.logger.log_tick_skipped(&source, &reason);
                self.status.record_skip(now, reason.clone()).await;
                TickOutcome::Skipped { source, reason }
            }
        };

        self.metrics
            .observe_tick_latency(start.elapsed().as_secs_f64());
        self.metrics.inc_ticks(outcome.kind().as_str());
        outcome
    }

    /// Fetch both observations; any failure aborts the tick
    async fn observe(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Vec<RawReplicaSetMetadata>, u64), CollaboratorError> {
        let replica_sets = self
            .bounded_call(
                components::CLUSTER_API,
                "kubernetes",
                self.replica_sets
                    .list_replica_sets(&self.config.namespace, &self.config.deployment),
            )
            .await?;

        let error_count = match &self.error_counts {
            Some(source) => {
                let (window_start, window_end) = self.spike_observer.window_bounds(now);
                self.bounded_call(
                    components::LOG_BACKEND,
                    "loki",
                    source.query_error_count(&self.config.app_label, window_start, window_end),
                )
                .await?
            }
            None => 0,
        };

        Ok((replica_sets, error_count))
    }

    /// Apply the per-call timeout and record collaborator health
    async fn bounded_call<T, F>(
        &self,
        component: &str,
        source_name: &'static str,
        call: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                source_name,
                timeout: self.config.call_timeout,
            }),
        };

        match &result {
            Ok(_) => self.health.set_healthy(component).await,
            Err(err) => self.health.set_degraded(component, err.to_string()).await,
        }

        result
    }

    async fn evaluate(
        &mut self,
        replica_sets: &[RawReplicaSetMetadata],
        error_count: u64,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let revision = self
            .rollout_observer
            .observe_current_revision(replica_sets, now);
        let spike = self.spike_observer.observe_error_spike(error_count, now);
        let incident = self.engine.evaluate(revision.as_ref(), &spike, now);

        self.metrics.set_last_error_count(error_count);
        self.metrics.set_ledger_entries(self.engine.ledger().len());
        self.status
            .record_evaluation(
                now,
                revision
                    .as_ref()
                    .map(|r| (r.revision_id.as_str(), r.created_at)),
                error_count,
                incident.as_ref(),
            )
            .await;

        debug!(
            revision = ?revision.as_ref().map(|r| &r.revision_id),
            error_count = error_count,
            threshold_exceeded = spike.threshold_exceeded,
            "Evaluated tick"
        );

        match incident {
            Some(incident) => {
                self.logger.log_incident(&incident);
                self.metrics.inc_incidents_emitted();
                self.emit(&incident).await;
                TickOutcome::Incident(incident)
            }
            None => TickOutcome::Quiet,
        }
    }

    /// Best-effort delivery to every sink
    async fn emit(&self, incident: &IncidentRecord) {
        for sink in &self.sinks {
            let name = sink.name();
            match sink.deliver(incident).await {
                Ok(()) => {
                    self.logger.log_delivery(name, &incident.incident_id, None);
                    self.health.set_healthy(name).await;
                    self.status.record_delivery(name, "sent").await;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.metrics.inc_sink_failures(name);
                    self.logger
                        .log_delivery(name, &incident.incident_id, Some(&message));
                    self.health
                        .update(name, ComponentHealth::degraded(message.clone()))
                        .await;
                    self.status
                        .record_delivery(name, format!("error: {}", message))
                        .await;
                }
            }
        }
    }
}

/// Builder for creating the detection loop
pub struct DetectionLoopBuilder {
    config: DetectionConfig,
    replica_sets: Option<Arc<dyn ReplicaSetSource>>,
    error_counts: Option<Arc<dyn ErrorCountSource>>,
    sinks: Vec<Arc<dyn IncidentSink>>,
    status: Option<StatusBoard>,
    health: Option<HealthRegistry>,
}

impl DetectionLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DetectionConfig::default(),
            replica_sets: None,
            error_counts: None,
            sinks: Vec::new(),
            status: None,
            health: None,
        }
    }

    /// Set the loop configuration
    pub fn config(mut self, config: DetectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the ReplicaSet source
    pub fn replica_sets(mut self, source: Arc<dyn ReplicaSetSource>) -> Self {
        self.replica_sets = Some(source);
        self
    }

    /// Set the error count source; leaving it unset disables spike detection
    pub fn error_counts(mut self, source: Arc<dyn ErrorCountSource>) -> Self {
        self.error_counts = Some(source);
        self
    }

    /// Add an incident sink
    pub fn sink(mut self, sink: Arc<dyn IncidentSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Share a status board with the HTTP surface
    pub fn status_board(mut self, status: StatusBoard) -> Self {
        self.status = Some(status);
        self
    }

    /// Share a health registry with the HTTP surface
    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the detection loop
    pub fn build(self) -> Result<DetectionLoop> {
        let replica_sets = self
            .replica_sets
            .ok_or_else(|| anyhow::anyhow!("ReplicaSet source is required"))?;
        if self.config.deployment.is_empty() {
            anyhow::bail!("Target deployment is required");
        }

        let mut detection_loop = DetectionLoop::new(self.config, replica_sets, self.error_counts);
        detection_loop.sinks = self.sinks;
        if let Some(status) = self.status {
            detection_loop.status = status;
        }
        if let Some(health) = self.health {
            detection_loop.health = health;
        }

        Ok(detection_loop)
    }
}

impl Default for DetectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
