//! Observability infrastructure for the threat detector
//!
//! Provides:
//! - Prometheus metrics (pipeline latency, run/error counts, flagged anomalies,
//!   connector failures, refresh freshness)
//! - Structured JSON logging with tracing

use crate::models::Severity;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Gauge,
    Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for pipeline run latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    run_latency_seconds: Histogram,
    runs: IntCounter,
    run_errors: IntCounter,
    samples_processed: IntCounter,
    anomalies_flagged: IntCounter,
    connector_errors: IntCounterVec,
    last_refresh_timestamp: Gauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            run_latency_seconds: register_histogram!(
                "threat_detector_run_latency_seconds",
                "Time spent preprocessing and scoring one batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            runs: register_int_counter!(
                "threat_detector_runs_total",
                "Total number of completed pipeline runs"
            )
            .expect("Failed to register runs_total"),

            run_errors: register_int_counter!(
                "threat_detector_run_errors_total",
                "Total number of failed pipeline runs"
            )
            .expect("Failed to register run_errors_total"),

            samples_processed: register_int_counter!(
                "threat_detector_samples_processed_total",
                "Total number of metric samples scored"
            )
            .expect("Failed to register samples_processed_total"),

            anomalies_flagged: register_int_counter!(
                "threat_detector_anomalies_flagged_total",
                "Total number of samples flagged as anomalous"
            )
            .expect("Failed to register anomalies_flagged_total"),

            connector_errors: register_int_counter_vec!(
                "threat_detector_connector_errors_total",
                "Total number of failed cloud connector requests",
                &["provider"]
            )
            .expect("Failed to register connector_errors_total"),

            last_refresh_timestamp: register_gauge!(
                "threat_detector_last_refresh_timestamp_seconds",
                "Unix time of the last successful dashboard refresh"
            )
            .expect("Failed to register last_refresh_timestamp_seconds"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    /// Record a successful run
    pub fn record_run(&self, duration_secs: f64, samples: usize, anomalies: usize) {
        let inner = self.inner();
        inner.run_latency_seconds.observe(duration_secs);
        inner.runs.inc();
        inner.samples_processed.inc_by(samples as u64);
        inner.anomalies_flagged.inc_by(anomalies as u64);
    }

    pub fn inc_run_errors(&self) {
        self.inner().run_errors.inc();
    }

    pub fn inc_connector_errors(&self, provider: &str) {
        self.inner()
            .connector_errors
            .with_label_values(&[provider])
            .inc();
    }

    pub fn set_last_refresh(&self, unix_secs: i64) {
        self.inner().last_refresh_timestamp.set(unix_secs as f64);
    }

    pub fn runs(&self) -> u64 {
        self.inner().runs.get()
    }

    pub fn run_errors(&self) -> u64 {
        self.inner().run_errors.get()
    }
}

/// Structured logger for detector events
///
/// Every line carries an `event` field so JSON logs can be filtered by kind.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_pipeline_completed(
        &self,
        samples: usize,
        anomalies: usize,
        filled_gaps: usize,
        duration_ms: u64,
    ) {
        info!(
            event = "pipeline_completed",
            component = %self.component,
            samples = samples,
            anomalies = anomalies,
            filled_gaps = filled_gaps,
            duration_ms = duration_ms,
            "Pipeline run completed"
        );
    }

    pub fn log_pipeline_failed(&self, error: &dyn std::fmt::Display) {
        error!(
            event = "pipeline_failed",
            component = %self.component,
            error = %error,
            "Pipeline run failed"
        );
    }

    /// Log a flagged time step; critical ones are logged at warn level
    pub fn log_anomaly(&self, timestamp: &str, score: f64, severity: Severity) {
        match severity {
            Severity::Critical => warn!(
                event = "anomaly_flagged",
                component = %self.component,
                timestamp = %timestamp,
                score = score,
                severity = %severity,
                "Critical anomaly flagged"
            ),
            _ => info!(
                event = "anomaly_flagged",
                component = %self.component,
                timestamp = %timestamp,
                score = score,
                severity = %severity,
                "Anomaly flagged"
            ),
        }
    }

    pub fn log_connector_failed(&self, provider: &str, error: &dyn std::fmt::Display) {
        warn!(
            event = "connector_failed",
            component = %self.component,
            provider = %provider,
            error = %error,
            "Cloud connector unavailable, incident panel omitted"
        );
    }

    pub fn log_refresh_failed(&self, error: &dyn std::fmt::Display, serving_stale: bool) {
        error!(
            event = "refresh_failed",
            component = %self.component,
            error = %error,
            serving_stale = serving_stale,
            "Dashboard refresh failed"
        );
    }

    pub fn log_dashboard_started(&self, version: &str, port: u16, interval_secs: u64) {
        info!(
            event = "dashboard_started",
            component = %self.component,
            version = %version,
            port = port,
            interval_secs = interval_secs,
            "Threat dashboard started"
        );
    }

    pub fn log_dashboard_shutdown(&self, reason: &str) {
        info!(
            event = "dashboard_shutdown",
            component = %self.component,
            reason = %reason,
            "Threat dashboard shutting down"
        );
    }
}
