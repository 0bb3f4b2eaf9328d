//! Shared dashboard state
//!
//! The refresher is the only writer. Each successful refresh replaces the
//! cached snapshot wholesale; the incident panel is replaced independently.

use chrono::{DateTime, Utc};
use detector_lib::{
    cloud::IncidentPanel,
    observability::PipelineMetrics,
    pipeline::{AnalysisResult, DataOrigin, ResultRow},
    report::{CurrentAnomaly, ReportSummary},
    HealthRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Number of most recent anomalies returned by the results API
pub const RECENT_ALERTS: usize = 20;

/// Result of one successful refresh
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub result: AnalysisResult,
    pub origin: DataOrigin,
    pub refreshed_at: DateTime<Utc>,
    /// Refresh cycle that produced this snapshot, starting at 0
    pub cycle: u64,
}

impl DashboardSnapshot {
    /// Most recent anomalies, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<ResultRow> {
        self.result
            .rows
            .iter()
            .rev()
            .filter(|row| row.is_anomaly)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn to_response(&self) -> ResultsResponse {
        ResultsResponse {
            refreshed_at: self.refreshed_at,
            cycle: self.cycle,
            origin: self.origin.clone(),
            summary: ReportSummary::from_result(&self.result),
            current: CurrentAnomaly::from_result(&self.result),
            recent_alerts: self.recent_alerts(RECENT_ALERTS),
        }
    }
}

/// Body of `GET /api/v1/results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub refreshed_at: DateTime<Utc>,
    pub cycle: u64,
    pub origin: DataOrigin,
    pub summary: ReportSummary,
    pub current: CurrentAnomaly,
    pub recent_alerts: Vec<ResultRow>,
}

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
    /// Page auto-refresh period, equal to the pipeline interval
    pub refresh_interval_secs: u64,
    latest: RwLock<Option<Arc<DashboardSnapshot>>>,
    panel: RwLock<IncidentPanel>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: PipelineMetrics,
        refresh_interval_secs: u64,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            refresh_interval_secs,
            latest: RwLock::new(None),
            panel: RwLock::new(IncidentPanel::Disabled),
        }
    }

    /// Replace the cached results
    pub async fn publish(&self, snapshot: DashboardSnapshot) {
        *self.latest.write().await = Some(Arc::new(snapshot));
    }

    pub async fn latest(&self) -> Option<Arc<DashboardSnapshot>> {
        self.latest.read().await.clone()
    }

    pub async fn has_results(&self) -> bool {
        self.latest.read().await.is_some()
    }

    pub async fn set_panel(&self, panel: IncidentPanel) {
        *self.panel.write().await = panel;
    }

    pub async fn panel(&self) -> IncidentPanel {
        self.panel.read().await.clone()
    }
}
