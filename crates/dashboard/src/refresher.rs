//! Periodic pipeline refresh
//!
//! Each tick loads a fresh batch, scores it on a blocking thread and
//! replaces the cached snapshot. The incident panel is fetched alongside
//! on its own task and stored regardless of how the pipeline run went. A
//! tick never starts while the previous one is still running.

use crate::state::{AppState, DashboardSnapshot};
use anyhow::{anyhow, Result};
use chrono::Utc;
use detector_lib::{
    cloud::{IncidentPanel, IncidentSource},
    health::components,
    observability::StructuredLogger,
    pipeline::{self, DataOrigin, LoadedData, Pipeline},
    simulator::CloudSimulator,
    DetectorConfig, PipelineError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Load the batch for one refresh cycle.
///
/// A configured input file is re-read every cycle and replaced by simulated
/// data when it cannot be read. Files that load but cannot be scored are
/// replaced later by `Pipeline::run_with_fallback`. Without a file, a fresh
/// burst window ending now is simulated with the seed advanced by the cycle
/// number.
pub fn load_batch(config: &DetectorConfig, cycle: u64) -> Result<LoadedData, PipelineError> {
    if config.input_path.is_some() {
        return pipeline::load_with_fallback(config);
    }

    let dataset = CloudSimulator::new(config.random_seed.wrapping_add(cycle))
        .with_attack_intensity(config.attack_intensity)
        .burst_window(Utc::now())?;
    Ok(LoadedData {
        truth: Some(dataset.truth()),
        samples: dataset.samples,
        origin: DataOrigin::Simulated,
    })
}

/// Re-runs the pipeline on a fixed interval and publishes into `AppState`
pub struct Refresher {
    config: DetectorConfig,
    pipeline: Arc<Pipeline>,
    state: Arc<AppState>,
    source: Option<Arc<dyn IncidentSource>>,
    interval: Duration,
    cycle: u64,
    logger: StructuredLogger,
}

impl Refresher {
    pub fn new(config: DetectorConfig, state: Arc<AppState>) -> Result<Self, PipelineError> {
        let pipeline = Pipeline::from_config(&config)?;
        Ok(Self {
            interval: Duration::from_secs(config.monitoring_interval_secs),
            config,
            pipeline: Arc::new(pipeline),
            state,
            source: None,
            cycle: 0,
            logger: StructuredLogger::new(components::REFRESHER),
        })
    }

    pub fn with_incident_source(mut self, source: Arc<dyn IncidentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Run one refresh cycle.
    ///
    /// On failure the previous snapshot stays in place and the pipeline
    /// component is marked degraded.
    pub async fn refresh_once(&mut self) -> Result<()> {
        let started = Instant::now();
        let cycle = self.cycle;
        self.cycle += 1;

        let pipeline = self.pipeline.clone();
        let config = self.config.clone();
        let run = tokio::task::spawn_blocking(move || {
            let data = load_batch(&config, cycle)?;
            let (result, data) = pipeline.run_with_fallback(&config, data)?;
            Ok::<_, PipelineError>((result, data.origin))
        });

        let source = self.source.clone();
        let fetch = tokio::spawn(async move { IncidentPanel::collect(source.as_deref()).await });

        let (outcome, panel) = tokio::join!(run, fetch);
        let panel = match panel {
            Ok(panel) => panel,
            Err(e) => {
                let provider = self.source.as_ref().map_or("unknown", |s| s.provider());
                self.logger.log_connector_failed(provider, &e);
                self.state.metrics.inc_connector_errors(provider);
                IncidentPanel::Unavailable {
                    reason: format!("incident fetch failed: {}", e),
                }
            }
        };
        self.apply_panel(panel).await;

        let health = &self.state.health_registry;
        let outcome = match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(anyhow!(e)),
            Err(e) => Err(anyhow!("refresh task failed: {}", e)),
        };

        match outcome {
            Ok((result, origin)) => {
                let refreshed_at = Utc::now();
                self.state
                    .publish(DashboardSnapshot {
                        result,
                        origin,
                        refreshed_at,
                        cycle,
                    })
                    .await;
                self.state.metrics.set_last_refresh(refreshed_at.timestamp());
                health.set_healthy(components::PIPELINE).await;
                health.set_ready(true).await;
                debug!(
                    cycle = cycle,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Refresh complete"
                );
                Ok(())
            }
            Err(e) => {
                let serving_stale = self.state.has_results().await;
                self.logger.log_refresh_failed(&e, serving_stale);
                health
                    .set_degraded(
                        components::PIPELINE,
                        format!("Last refresh failed: {}", e),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn apply_panel(&self, panel: IncidentPanel) {
        let health = &self.state.health_registry;
        match &panel {
            IncidentPanel::Available { .. } => {
                health.set_healthy(components::CLOUD_CONNECTOR).await;
            }
            IncidentPanel::Unavailable { reason } => {
                health
                    .set_degraded(components::CLOUD_CONNECTOR, reason.clone())
                    .await;
            }
            IncidentPanel::Disabled => {}
        }
        self.state.set_panel(panel).await;
    }

    /// Spawn `run` and mark the refresher unhealthy if it ends abnormally
    pub fn spawn(self, shutdown: tokio::sync::broadcast::Receiver<()>) -> JoinHandle<()> {
        let state = self.state.clone();
        supervise(tokio::spawn(self.run(shutdown)), state)
    }

    /// Run until the shutdown channel fires
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            source = if self.config.input_path.is_some() { "file" } else { "simulated" },
            "Starting dashboard refresher"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged and reflected in health
                    let _ = self.refresh_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down dashboard refresher");
                    break;
                }
            }
        }

        self.state
            .health_registry
            .set_unhealthy(components::REFRESHER, "Refresher stopped")
            .await;
    }
}

fn supervise(task: JoinHandle<()>, state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(error = %e, "Dashboard refresher crashed");
            state
                .health_registry
                .set_unhealthy(components::REFRESHER, format!("Refresher crashed: {}", e))
                .await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use detector_lib::{
        cloud::ConnectorResult,
        health::ComponentStatus,
        models::{IncidentRecord, InfraSnapshot},
        observability::PipelineMetrics,
        simulator::BURST_WINDOW_POINTS,
        ConnectorError, HealthRegistry,
    };
    use std::io::Write;
    use std::path::PathBuf;

    struct RejectingSource;

    #[async_trait]
    impl IncidentSource for RejectingSource {
        fn provider(&self) -> &'static str {
            "test"
        }

        async fn fetch_incidents(&self) -> ConnectorResult<Vec<IncidentRecord>> {
            Err(ConnectorError::Authentication {
                status: 401,
                message: "token expired".to_string(),
            })
        }

        async fn fetch_snapshot(&self) -> ConnectorResult<InfraSnapshot> {
            Ok(InfraSnapshot::from_instances(vec![]))
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl IncidentSource for PanickingSource {
        fn provider(&self) -> &'static str {
            "test"
        }

        async fn fetch_incidents(&self) -> ConnectorResult<Vec<IncidentRecord>> {
            panic!("malformed incident payload")
        }

        async fn fetch_snapshot(&self) -> ConnectorResult<InfraSnapshot> {
            Ok(InfraSnapshot::from_instances(vec![]))
        }
    }

    fn single_row_csv() -> tempfile::NamedTempFile {
        // Parses, but a single sample is too few to score
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,cpu_usage,network_traffic,login_attempts").unwrap();
        writeln!(file, "2025-01-01T00:00:00Z,0.3,0.2,5").unwrap();
        file
    }

    async fn refresher(config: DetectorConfig) -> (Refresher, Arc<AppState>) {
        let health = HealthRegistry::new();
        health.register(components::PIPELINE).await;
        health.register(components::REFRESHER).await;
        let state = Arc::new(AppState::new(
            health,
            PipelineMetrics::new(),
            config.monitoring_interval_secs,
        ));
        (Refresher::new(config, state.clone()).unwrap(), state)
    }

    #[test]
    fn test_burst_batch_advances_seed_per_cycle() {
        let config = DetectorConfig::default();
        let first = load_batch(&config, 0).unwrap();
        let second = load_batch(&config, 1).unwrap();
        assert_eq!(first.samples.len(), BURST_WINDOW_POINTS);
        assert_eq!(first.origin, DataOrigin::Simulated);
        assert_ne!(first.samples[0].readings, second.samples[0].readings);
    }

    #[test]
    fn test_unreadable_input_falls_back_to_simulation() {
        let config = DetectorConfig {
            input_path: Some(PathBuf::from("/nonexistent/metrics.csv")),
            simulation_days: 1,
            ..DetectorConfig::default()
        };
        let data = load_batch(&config, 0).unwrap();
        assert!(matches!(data.origin, DataOrigin::SimulatedFallback { .. }));
        assert_eq!(data.samples.len(), 25);
    }

    #[tokio::test]
    async fn test_refresh_publishes_and_marks_ready() {
        let (mut refresher, state) = refresher(DetectorConfig::default()).await;

        refresher.refresh_once().await.unwrap();

        let latest = state.latest().await.unwrap();
        assert_eq!(latest.cycle, 0);
        assert_eq!(latest.result.len(), BURST_WINDOW_POINTS);
        assert!(latest.result.anomaly_count() > 0);
        assert!(state.health_registry.readiness().await.ready);
        assert_eq!(refresher.cycle(), 1);
    }

    #[tokio::test]
    async fn test_unscorable_input_falls_back_to_simulation() {
        let file = single_row_csv();
        let config = DetectorConfig {
            input_path: Some(file.path().to_path_buf()),
            simulation_days: 1,
            ..DetectorConfig::default()
        };
        let (mut refresher, state) = refresher(config).await;

        refresher.refresh_once().await.unwrap();

        let latest = state.latest().await.unwrap();
        assert_eq!(latest.result.len(), 25);
        match &latest.origin {
            DataOrigin::SimulatedFallback { path, reason } => {
                assert_eq!(path, file.path());
                assert!(reason.contains("Insufficient data"));
            }
            other => panic!("expected simulated fallback, got {:?}", other),
        }
        let pipeline = state
            .health_registry
            .component(components::PIPELINE)
            .await
            .unwrap();
        assert_eq!(pipeline.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_snapshot() {
        let (mut refresher, state) = refresher(DetectorConfig::default()).await;
        refresher.refresh_once().await.unwrap();
        let first = state.latest().await.unwrap();

        // Unscorable input and a fallback simulation that cannot run
        let file = single_row_csv();
        refresher.config.input_path = Some(file.path().to_path_buf());
        refresher.config.simulation_days = 0;

        assert!(refresher.refresh_once().await.is_err());

        let latest = state.latest().await.unwrap();
        assert_eq!(latest.cycle, first.cycle);
        assert_eq!(latest.refreshed_at, first.refreshed_at);
        let pipeline = state
            .health_registry
            .component(components::PIPELINE)
            .await
            .unwrap();
        assert_eq!(pipeline.status, ComponentStatus::Degraded);
        assert!(state.health_registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_connector_failure_degrades_but_keeps_results() {
        let (refresher, state) = refresher(DetectorConfig::default()).await;
        let mut refresher = refresher.with_incident_source(Arc::new(RejectingSource));

        refresher.refresh_once().await.unwrap();

        assert!(state.has_results().await);
        assert!(matches!(
            state.panel().await,
            IncidentPanel::Unavailable { .. }
        ));
        let connector = state
            .health_registry
            .component(components::CLOUD_CONNECTOR)
            .await
            .unwrap();
        assert_eq!(connector.status, ComponentStatus::Degraded);
        assert!(state.health_registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_panicking_connector_does_not_stop_refresher() {
        let (refresher, state) = refresher(DetectorConfig::default()).await;
        let refresher = refresher
            .with_incident_source(Arc::new(PanickingSource))
            .interval(Duration::from_millis(10));
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let handle = refresher.spawn(rx);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!handle.is_finished());
        assert!(state.has_results().await);
        match state.panel().await {
            IncidentPanel::Unavailable { reason } => {
                assert!(reason.contains("incident fetch failed"))
            }
            other => panic!("expected unavailable panel, got {:?}", other),
        }
        let connector = state
            .health_registry
            .component(components::CLOUD_CONNECTOR)
            .await
            .unwrap();
        assert_eq!(connector.status, ComponentStatus::Degraded);
        let refresher_health = state
            .health_registry
            .component(components::REFRESHER)
            .await
            .unwrap();
        assert_eq!(refresher_health.status, ComponentStatus::Healthy);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_crashed_refresher_is_marked_unhealthy() {
        let (_, state) = refresher(DetectorConfig::default()).await;
        let task: JoinHandle<()> = tokio::spawn(async { panic!("refresh loop died") });

        supervise(task, state.clone()).await.unwrap();

        let refresher_health = state
            .health_registry
            .component(components::REFRESHER)
            .await
            .unwrap();
        assert_eq!(refresher_health.status, ComponentStatus::Unhealthy);
        assert!(refresher_health
            .message
            .as_deref()
            .is_some_and(|m| m.contains("crashed")));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (refresher, state) = refresher(DetectorConfig::default()).await;
        let refresher = refresher.interval(Duration::from_millis(10));
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let handle = tokio::spawn(refresher.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(state.has_results().await);
        let refresher_health = state
            .health_registry
            .component(components::REFRESHER)
            .await
            .unwrap();
        assert_eq!(refresher_health.status, ComponentStatus::Unhealthy);
    }
}
