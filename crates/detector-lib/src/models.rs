//! Core data models for the threat detection pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names produced by the simulator
pub mod metric {
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const NETWORK_TRAFFIC: &str = "network_traffic";
    pub const LOGIN_ATTEMPTS: &str = "login_attempts";
}

/// A single time-indexed set of infrastructure readings.
///
/// A reading that was not observed is simply absent from `readings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub readings: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: BTreeMap::new(),
        }
    }

    pub fn with_reading(mut self, name: impl Into<String>, value: f64) -> Self {
        self.readings.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.readings.get(name).copied().filter(|v| v.is_finite())
    }
}

/// Feature vector for a single timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// Ordered feature vectors sharing one set of column names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub rows: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn values(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values.clone()).collect()
    }
}

/// Outcome of scoring one feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
    /// Model decision value: negative is anomalous, lower is more anomalous
    pub score: f64,
}

impl AnomalyVerdict {
    pub fn severity(&self) -> Option<Severity> {
        if !self.is_anomaly {
            return None;
        }
        Some(Severity::from_score(self.score))
    }
}

/// Severity of a flagged time step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score <= -0.1 {
            Severity::Critical
        } else if score <= -0.05 {
            Severity::High
        } else {
            Severity::Warning
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Synthetic attack patterns injected by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Ddos,
    BruteForce,
    ResourceExhaustion,
    TrafficBurst,
}

impl AttackKind {
    /// Label written to exported datasets
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::Ddos => "ddos",
            AttackKind::BruteForce => "brute_force",
            AttackKind::ResourceExhaustion => "resource_exhaustion",
            AttackKind::TrafficBurst => "traffic_burst",
        }
    }
}

impl std::fmt::Display for AttackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttackKind::Ddos => write!(f, "DDoS"),
            AttackKind::BruteForce => write!(f, "BruteForce"),
            AttackKind::ResourceExhaustion => write!(f, "ResourceExhaustion"),
            AttackKind::TrafficBurst => write!(f, "TrafficBurst"),
        }
    }
}

/// Severity reported by the cloud provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    /// Map a Cloud Logging severity name onto our scale
    pub fn from_log_severity(severity: &str) -> Self {
        match severity.to_ascii_uppercase().as_str() {
            "EMERGENCY" | "ALERT" | "CRITICAL" => IncidentSeverity::Critical,
            "ERROR" => IncidentSeverity::High,
            "WARNING" => IncidentSeverity::Medium,
            _ => IncidentSeverity::Low,
        }
    }
}

impl std::fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentSeverity::Low => write!(f, "low"),
            IncidentSeverity::Medium => write!(f, "medium"),
            IncidentSeverity::High => write!(f, "high"),
            IncidentSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    AlertPolicy,
    LogEntry,
}

/// Read-only incident snapshot owned by the cloud connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub name: String,
    pub severity: IncidentSeverity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub kind: IncidentKind,
}

/// Load classification of the monitored infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadStatus {
    Normal,
    Warning,
    Critical,
}

impl LoadStatus {
    pub fn from_cpu_percent(percent: f64) -> Self {
        if percent > 80.0 {
            LoadStatus::Critical
        } else if percent > 50.0 {
            LoadStatus::Warning
        } else {
            LoadStatus::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReading {
    pub instance_id: String,
    pub zone: Option<String>,
    pub cpu_utilization_percent: f64,
    pub observed_at: DateTime<Utc>,
}

/// Snapshot of provider-side infrastructure metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraSnapshot {
    pub observed_at: Option<DateTime<Utc>>,
    pub cpu_utilization_percent: Option<f64>,
    pub load: LoadStatus,
    pub instances: Vec<InstanceReading>,
}

impl InfraSnapshot {
    /// Build a snapshot from per-instance readings, using the most recent one
    pub fn from_instances(instances: Vec<InstanceReading>) -> Self {
        let latest = instances.iter().max_by_key(|r| r.observed_at);
        let cpu = latest.map(|r| r.cpu_utilization_percent);
        Self {
            observed_at: latest.map(|r| r.observed_at),
            cpu_utilization_percent: cpu,
            load: cpu
                .map(LoadStatus::from_cpu_percent)
                .unwrap_or(LoadStatus::Normal),
            instances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_ignores_non_finite_readings() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let sample = MetricSample::new(ts)
            .with_reading(metric::CPU_USAGE, 0.4)
            .with_reading(metric::NETWORK_TRAFFIC, f64::NAN);
        assert_eq!(sample.get(metric::CPU_USAGE), Some(0.4));
        assert_eq!(sample.get(metric::NETWORK_TRAFFIC), None);
        assert_eq!(sample.get(metric::LOGIN_ATTEMPTS), None);
    }

    #[test]
    fn test_verdict_severity() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let normal = AnomalyVerdict {
            timestamp: ts,
            is_anomaly: false,
            score: 0.1,
        };
        assert_eq!(normal.severity(), None);

        let critical = AnomalyVerdict {
            is_anomaly: true,
            score: -0.2,
            ..normal.clone()
        };
        assert_eq!(critical.severity(), Some(Severity::Critical));

        let warning = AnomalyVerdict {
            is_anomaly: true,
            score: -0.01,
            ..normal
        };
        assert_eq!(warning.severity(), Some(Severity::Warning));
    }

    #[test]
    fn test_log_severity_mapping() {
        assert_eq!(
            IncidentSeverity::from_log_severity("ERROR"),
            IncidentSeverity::High
        );
        assert_eq!(
            IncidentSeverity::from_log_severity("warning"),
            IncidentSeverity::Medium
        );
        assert_eq!(
            IncidentSeverity::from_log_severity("ALERT"),
            IncidentSeverity::Critical
        );
        assert_eq!(
            IncidentSeverity::from_log_severity("DEFAULT"),
            IncidentSeverity::Low
        );
    }

    #[test]
    fn test_snapshot_uses_latest_reading() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let snapshot = InfraSnapshot::from_instances(vec![
            InstanceReading {
                instance_id: "a".into(),
                zone: None,
                cpu_utilization_percent: 20.0,
                observed_at: early,
            },
            InstanceReading {
                instance_id: "b".into(),
                zone: Some("us-central1-a".into()),
                cpu_utilization_percent: 87.5,
                observed_at: late,
            },
        ]);
        assert_eq!(snapshot.cpu_utilization_percent, Some(87.5));
        assert_eq!(snapshot.load, LoadStatus::Critical);
        assert_eq!(snapshot.observed_at, Some(late));
    }

    #[test]
    fn test_empty_snapshot_is_normal() {
        let snapshot = InfraSnapshot::from_instances(vec![]);
        assert_eq!(snapshot.load, LoadStatus::Normal);
        assert!(snapshot.cpu_utilization_percent.is_none());
    }
}
