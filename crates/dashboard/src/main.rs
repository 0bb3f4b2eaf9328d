//! Threat dashboard - live view of the cloud threat detector
//!
//! Re-runs detection every monitoring interval and serves the latest
//! results until interrupted.

use anyhow::Result;
use detector_lib::{
    cloud,
    health::{components, HealthRegistry},
    observability::{PipelineMetrics, StructuredLogger},
    DetectorConfig, IncidentSource,
};
use std::sync::Arc;
use threat_dashboard::{api, AppState, Refresher};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DASHBOARD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting threat-dashboard");

    let config = DetectorConfig::load()?;
    info!(
        contamination = config.contamination,
        seed = config.random_seed,
        input = ?config.input_path,
        "Dashboard configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::REFRESHER).await;

    let source: Option<Arc<dyn IncidentSource>> = match cloud::connector_from_env() {
        Ok(Some(source)) => {
            info!(provider = source.provider(), "Cloud incident panel enabled");
            health_registry.register(components::CLOUD_CONNECTOR).await;
            Some(source)
        }
        Ok(None) => {
            info!("Cloud credentials not set, incident panel disabled");
            None
        }
        Err(e) => {
            warn!(error = %e, "Cloud connector misconfigured, incident panel disabled");
            health_registry
                .set_degraded(components::CLOUD_CONNECTOR, e.to_string())
                .await;
            None
        }
    };

    let metrics = PipelineMetrics::new();
    let logger = StructuredLogger::new("dashboard");

    let app_state = Arc::new(AppState::new(
        health_registry,
        metrics,
        config.monitoring_interval_secs,
    ));

    let mut refresher = Refresher::new(config.clone(), app_state.clone())?;
    if let Some(source) = source {
        refresher = refresher.with_incident_source(source);
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let refresher_handle = refresher.spawn(shutdown_tx.subscribe());
    let mut api_handle = tokio::spawn(api::serve(
        config.dashboard_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    logger.log_dashboard_started(
        DASHBOARD_VERSION,
        config.dashboard_port,
        config.monitoring_interval_secs,
    );

    // Wait for shutdown signal, or the server failing to start
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            logger.log_dashboard_shutdown("SIGINT received");
            signal.map_err(anyhow::Error::from)
        }
        served = &mut api_handle => {
            let outcome = served.map_err(anyhow::Error::from).and_then(|r| r);
            if let Err(e) = &outcome {
                error!(error = %e, "Dashboard server stopped");
            }
            logger.log_dashboard_shutdown("server stopped");
            outcome
        }
    };

    let _ = shutdown_tx.send(());
    let _ = refresher_handle.await;
    if !api_handle.is_finished() {
        let _ = api_handle.await;
    }
    info!("Shutting down");

    outcome
}
