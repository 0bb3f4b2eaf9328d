//! Google Cloud Monitoring / Logging connector
//!
//! Talks to the public REST APIs with a bearer token. Credentials come
//! only from the environment and are never written anywhere.

use super::types::{
    AlertPolicy, AlertPolicyList, ListEntriesRequest, ListEntriesResponse, LogEntry,
    TimeSeriesList,
};
use super::http::{base_url, send_json};
use super::{ConnectorResult, IncidentSource};
use crate::error::ConnectorError;
use crate::ingest::parse_timestamp;
use crate::models::{
    IncidentKind, IncidentRecord, IncidentSeverity, InfraSnapshot, InstanceReading,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_ACCESS_TOKEN: &str = "GCP_ACCESS_TOKEN";
pub const ENV_MONITORING_ENDPOINT: &str = "GCP_MONITORING_ENDPOINT";
pub const ENV_LOGGING_ENDPOINT: &str = "GCP_LOGGING_ENDPOINT";

const DEFAULT_MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com/";
const DEFAULT_LOGGING_ENDPOINT: &str = "https://logging.googleapis.com/";
const CPU_METRIC: &str = "compute.googleapis.com/instance/cpu/utilization";

/// Connector settings
#[derive(Debug, Clone)]
pub struct GcpConfig {
    pub project_id: String,
    pub access_token: String,
    pub monitoring_endpoint: Url,
    pub logging_endpoint: Url,
    pub request_timeout: Duration,
    /// How far back CPU points are requested
    pub metric_window: chrono::Duration,
    /// How far back warning-or-worse log entries are requested
    pub log_window: chrono::Duration,
    pub max_log_entries: u32,
}

impl GcpConfig {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> ConnectorResult<Self> {
        Ok(Self {
            project_id: project_id.into(),
            access_token: access_token.into(),
            monitoring_endpoint: Url::parse(DEFAULT_MONITORING_ENDPOINT)?,
            logging_endpoint: Url::parse(DEFAULT_LOGGING_ENDPOINT)?,
            request_timeout: Duration::from_secs(20),
            metric_window: chrono::Duration::minutes(10),
            log_window: chrono::Duration::hours(1),
            max_log_entries: 10,
        })
    }

    /// Point both APIs at a custom base URL
    pub fn with_endpoints(mut self, monitoring: &str, logging: &str) -> ConnectorResult<Self> {
        self.monitoring_endpoint = base_url(monitoring)?;
        self.logging_endpoint = base_url(logging)?;
        Ok(self)
    }

    /// Build from a variable lookup; `from_env` passes `std::env::var`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConnectorResult<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConnectorError::MissingCredentials(name.to_string()))
        };

        let mut config = Self::new(required(ENV_PROJECT_ID)?, required(ENV_ACCESS_TOKEN)?)?;
        if let Some(endpoint) = lookup(ENV_MONITORING_ENDPOINT) {
            config.monitoring_endpoint = base_url(&endpoint)?;
        }
        if let Some(endpoint) = lookup(ENV_LOGGING_ENDPOINT) {
            config.logging_endpoint = base_url(&endpoint)?;
        }
        Ok(config)
    }
}

/// Read-only client for Cloud Monitoring and Cloud Logging
pub struct GcpMonitoringConnector {
    client: Client,
    config: GcpConfig,
}

impl GcpMonitoringConnector {
    pub fn new(config: GcpConfig) -> ConnectorResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> ConnectorResult<Self> {
        Self::new(GcpConfig::from_lookup(|name| std::env::var(name).ok())?)
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ConnectorResult<T> {
        send_json(request, &self.config.access_token).await
    }

    async fn list_alert_policies(&self) -> ConnectorResult<Vec<AlertPolicy>> {
        let url = self
            .config
            .monitoring_endpoint
            .join(&format!("v3/projects/{}/alertPolicies", self.config.project_id))?;
        let list: AlertPolicyList = self.send(self.client.get(url)).await?;
        Ok(list.alert_policies)
    }

    async fn list_log_entries(&self, since: DateTime<Utc>) -> ConnectorResult<Vec<LogEntry>> {
        let url = self.config.logging_endpoint.join("v2/entries:list")?;
        let request = ListEntriesRequest {
            resource_names: vec![format!("projects/{}", self.config.project_id)],
            filter: format!(
                "severity>=WARNING timestamp>\"{}\"",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            order_by: "timestamp desc".to_string(),
            page_size: self.config.max_log_entries,
        };
        let response: ListEntriesResponse =
            self.send(self.client.post(url).json(&request)).await?;
        Ok(response.entries)
    }
}

#[async_trait]
impl IncidentSource for GcpMonitoringConnector {
    fn provider(&self) -> &'static str {
        "gcp"
    }

    async fn fetch_snapshot(&self) -> ConnectorResult<InfraSnapshot> {
        let end = Utc::now();
        let start = end - self.config.metric_window;
        let url = self
            .config
            .monitoring_endpoint
            .join(&format!("v3/projects/{}/timeSeries", self.config.project_id))?;

        let request = self.client.get(url).query(&[
            ("filter", format!("metric.type=\"{}\"", CPU_METRIC)),
            (
                "interval.startTime",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "interval.endTime",
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ]);
        let list: TimeSeriesList = self.send(request).await?;

        let mut instances = Vec::new();
        for series in list.time_series {
            let Some(point) = series.points.first() else {
                continue;
            };
            let Some(fraction) = point.value.double_value else {
                continue;
            };
            let observed_at = parse_timestamp(&point.interval.end_time).map_err(ConnectorError::Decode)?;
            let instance_id = series
                .resource
                .labels
                .get("instance_id")
                .or_else(|| series.metric.labels.get("instance_name"))
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());

            instances.push(InstanceReading {
                instance_id,
                zone: series.resource.labels.get("zone").cloned(),
                cpu_utilization_percent: (fraction * 10_000.0).round() / 100.0,
                observed_at,
            });
        }

        debug!(
            project = %self.config.project_id,
            instances = instances.len(),
            "Fetched CPU utilization snapshot"
        );
        Ok(InfraSnapshot::from_instances(instances))
    }

    async fn fetch_incidents(&self) -> ConnectorResult<Vec<IncidentRecord>> {
        let snapshot = self.fetch_snapshot().await?;
        let now = Utc::now();
        let mut incidents = Vec::new();

        if let Some(cpu) = snapshot.cpu_utilization_percent {
            let observed_at = snapshot.observed_at.unwrap_or(now);
            for policy in self.list_alert_policies().await? {
                if policy.enabled && policy_triggered(&policy, cpu) {
                    incidents.push(policy_incident(&policy, observed_at));
                }
            }
        }

        for entry in self.list_log_entries(now - self.config.log_window).await? {
            incidents.push(log_incident(&entry)?);
        }

        debug!(
            project = %self.config.project_id,
            incidents = incidents.len(),
            "Fetched incidents"
        );
        Ok(incidents)
    }
}

/// A policy fires when one of its CPU utilization conditions is exceeded
fn policy_triggered(policy: &AlertPolicy, cpu_percent: f64) -> bool {
    policy.conditions.iter().any(|condition| {
        let name = condition.display_name.to_lowercase();
        if !(name.contains("cpu") && name.contains("utilization")) {
            return false;
        }
        let threshold = condition
            .condition_threshold
            .as_ref()
            .and_then(|t| t.threshold_value)
            // The API expresses utilization as a fraction
            .map(|v| if v <= 1.0 { v * 100.0 } else { v })
            .or_else(|| percent_in_name(&name));
        threshold.is_some_and(|t| cpu_percent > t)
    })
}

/// Extract a threshold such as "80%" from a condition name
fn percent_in_name(name: &str) -> Option<f64> {
    let end = name.find('%')?;
    let start = name[..end]
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    name[start..end].parse().ok()
}

fn policy_incident(policy: &AlertPolicy, observed_at: DateTime<Utc>) -> IncidentRecord {
    let severity = if policy.display_name.to_lowercase().contains("high") {
        IncidentSeverity::High
    } else {
        IncidentSeverity::Medium
    };
    IncidentRecord {
        id: policy
            .name
            .rsplit('/')
            .next()
            .unwrap_or(&policy.name)
            .to_string(),
        name: format!("TRIGGERED: {}", policy.display_name),
        severity,
        timestamp: observed_at,
        description: format!("Alert policy triggered: {}", policy.display_name),
        kind: IncidentKind::AlertPolicy,
    }
}

fn log_incident(entry: &LogEntry) -> ConnectorResult<IncidentRecord> {
    let timestamp = parse_timestamp(&entry.timestamp).map_err(ConnectorError::Decode)?;
    let id = entry
        .insert_id
        .clone()
        .unwrap_or_else(|| timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    Ok(IncidentRecord {
        id: format!("log_{}", id),
        name: format!("Log Alert: {}", entry.severity),
        severity: IncidentSeverity::from_log_severity(&entry.severity),
        timestamp,
        description: entry.payload(),
        kind: IncidentKind::LogEntry,
    })
}
