//! Rollout Detector - correlates new Deployment rollouts with error log spikes
//!
//! Runs as a single replica next to the watched workload, polling the cluster
//! API and Loki and reporting one incident per regressing revision.

use anyhow::{Context, Result};
use std::future::Future;
use detector_lib::{
    health::components,
    sink::{JsonLineSink, SlackNotifier},
    source::{KubeReplicaSetSource, LokiErrorCountSource},
    DetectionLoopBuilder, HealthRegistry, StatusBoard, StructuredLogger,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries incident lines only
    log_subscriber(std::io::stderr).init();

    info!("Starting rollout-detector");

    let config = match config::DetectorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };
    info!(
        namespace = %config.namespace,
        deployment = %config.target_deployment,
        "Detector configured"
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER_API).await;

    let mut builder = DetectionLoopBuilder::new()
        .config(config.detection_config())
        .replica_sets(Arc::new(KubeReplicaSetSource::new(client)))
        .sink(Arc::new(JsonLineSink::stdout()));

    match &config.loki_url {
        Some(url) => {
            let source =
                LokiErrorCountSource::new(url, config.namespace.clone(), config.http_timeout)?;
            builder = builder.error_counts(Arc::new(source));
            health_registry.register(components::LOG_BACKEND).await;
        }
        None => {
            health_registry
                .register_disabled(components::LOG_BACKEND, "LOKI_URL not set")
                .await;
        }
    }

    match &config.slack_webhook_url {
        Some(url) => {
            builder = builder.sink(Arc::new(SlackNotifier::new(url, config.http_timeout)?));
            health_registry.register(components::SLACK).await;
        }
        None => {
            health_registry
                .register_disabled(components::SLACK, "SLACK_WEBHOOK_URL not set")
                .await;
        }
    }

    let status = StatusBoard::new();
    let detection = builder
        .status_board(status.clone())
        .health_registry(health_registry.clone())
        .build()?;

    let logger = StructuredLogger::new(&config.namespace, &config.target_deployment);
    logger.log_startup(
        DETECTOR_VERSION,
        config.loki_url.is_some(),
        config.slack_webhook_url.is_some(),
    );

    // Start health, status and metrics server
    let app_state = Arc::new(api::AppState::new(
        health_registry,
        status,
        config.summary(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let shutdown = CancellationToken::new();
    let mut loop_handle = tokio::spawn(detection.run(shutdown.clone()));

    let exit = wait_for_exit(shutdown_signal(), api_handle, &mut loop_handle).await?;
    shutdown.cancel();

    match exit {
        Exit::Shutdown(reason) => {
            if let Err(e) = loop_handle.await {
                error!(error = %e, "Detection loop task failed");
            }
            logger.log_shutdown(reason);
            info!("Shutting down");
            Ok(())
        }
        Exit::LoopEnded(reason) => {
            logger.log_shutdown(&reason);
            anyhow::bail!("{}", reason)
        }
    }
}

/// JSON log records written to `writer`, filtered by `RUST_LOG` (default `info`)
fn log_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(writer))
}

/// Why the process stops
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// Signal received or the API server stopped; the loop is still running
    Shutdown(&'static str),
    /// The detection loop ended without being cancelled
    LoopEnded(String),
}

/// Wait for a shutdown signal, the API server ending, or the detection loop ending
async fn wait_for_exit<S>(
    signal: S,
    api_handle: JoinHandle<Result<()>>,
    loop_handle: &mut JoinHandle<()>,
) -> Result<Exit>
where
    S: Future<Output = Result<&'static str>>,
{
    let exit = tokio::select! {
        reason = signal => Exit::Shutdown(reason?),
        result = api_handle => {
            match result {
                Ok(Ok(())) => Exit::Shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    Exit::Shutdown("API server failed")
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    Exit::Shutdown("API server task panicked")
                }
            }
        }
        result = loop_handle => {
            let reason = match result {
                Ok(()) => "Detection loop stopped".to_string(),
                Err(e) => format!("Detection loop task failed: {}", e),
            };
            error!(reason = %reason, "Detection loop ended unexpectedly");
            Exit::LoopEnded(reason)
        }
    };

    Ok(exit)
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT received")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use detector_lib::observer::LogSpikeObserver;
    use detector_lib::sink::IncidentSink;
    use detector_lib::{CorrelationEngine, IncidentRecord, RolloutRevision};
    use std::future::pending;
    use std::io::Write;
    use std::num::NonZeroU64;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn incident() -> IncidentRecord {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = created + chrono::Duration::minutes(3);
        let revision = RolloutRevision {
            revision_id: "rs-abc123".to_string(),
            revision_number: None,
            created_at: created,
        };
        let spike = LogSpikeObserver::new(NonZeroU64::new(5).unwrap()).observe_error_spike(7, now);

        CorrelationEngine::new("demo-aiops", "payments-api")
            .evaluate(Some(&revision), &spike, now)
            .unwrap()
    }

    #[tokio::test]
    async fn test_logs_and_incidents_use_separate_writers() {
        let logs = Captured::default();
        let _guard = tracing::subscriber::set_default(log_subscriber(logs.clone()));

        let incident = incident();
        StructuredLogger::new("demo-aiops", "payments-api").log_incident(&incident);
        let sink = JsonLineSink::new(Vec::new());
        sink.deliver(&incident).await.unwrap();

        assert!(logs.text().contains("incident_detected"));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(!out.contains("incident_detected"));
        let parsed: IncidentRecord = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed.revision_id, "rs-abc123");
    }

    fn idle_api() -> JoinHandle<Result<()>> {
        tokio::spawn(pending())
    }

    #[tokio::test]
    async fn test_panicked_loop_ends_process() {
        let mut loop_handle: JoinHandle<()> = tokio::spawn(async { panic!("tick overflowed") });

        let exit = wait_for_exit(pending(), idle_api(), &mut loop_handle)
            .await
            .unwrap();

        match exit {
            Exit::LoopEnded(reason) => assert!(reason.contains("Detection loop task failed")),
            other => panic!("expected loop exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_returned_loop_ends_process() {
        let mut loop_handle = tokio::spawn(async {});

        let exit = wait_for_exit(pending(), idle_api(), &mut loop_handle)
            .await
            .unwrap();

        assert_eq!(exit, Exit::LoopEnded("Detection loop stopped".to_string()));
    }

    #[tokio::test]
    async fn test_signal_requests_shutdown() {
        let mut loop_handle: JoinHandle<()> = tokio::spawn(pending());

        let exit = wait_for_exit(async { Ok("SIGTERM received") }, idle_api(), &mut loop_handle)
            .await
            .unwrap();

        assert_eq!(exit, Exit::Shutdown("SIGTERM received"));
        loop_handle.abort();
    }

    #[tokio::test]
    async fn test_failed_api_server_requests_shutdown() {
        let api: JoinHandle<Result<()>> =
            tokio::spawn(async { Err(anyhow::anyhow!("address in use")) });
        let mut loop_handle: JoinHandle<()> = tokio::spawn(pending());

        let exit = wait_for_exit(pending(), api, &mut loop_handle).await.unwrap();

        assert_eq!(exit, Exit::Shutdown("API server failed"));
        loop_handle.abort();
    }
}
