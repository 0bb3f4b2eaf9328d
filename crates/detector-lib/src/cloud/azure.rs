//! Azure Monitor connector
//!
//! Reads VM CPU metrics, fired alerts and the activity log through the
//! Azure Resource Manager REST API with a bearer token taken from the
//! environment.

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
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ENV_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const ENV_ACCESS_TOKEN: &str = "AZURE_ACCESS_TOKEN";
pub const ENV_REGION: &str = "AZURE_REGION";
pub const ENV_MANAGEMENT_ENDPOINT: &str = "AZURE_MANAGEMENT_ENDPOINT";

const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com/";
const DEFAULT_REGION: &str = "eastus";
const METRICS_API_VERSION: &str = "2023-10-01";
const ALERTS_API_VERSION: &str = "2019-05-05-preview";
const ACTIVITY_LOG_API_VERSION: &str = "2015-04-01";
const VM_NAMESPACE: &str = "Microsoft.Compute/virtualMachines";
const CPU_METRIC: &str = "Percentage CPU";

/// Connector settings
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub subscription_id: String,
    pub access_token: String,
    /// Region used for the subscription-wide VM metrics query
    pub region: String,
    pub management_endpoint: Url,
    pub request_timeout: Duration,
    pub metric_window: chrono::Duration,
    pub log_window: chrono::Duration,
    pub max_log_entries: usize,
}

impl AzureConfig {
    pub fn new(
        subscription_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            subscription_id: subscription_id.into(),
            access_token: access_token.into(),
            region: DEFAULT_REGION.to_string(),
            management_endpoint: Url::parse(DEFAULT_MANAGEMENT_ENDPOINT)?,
            request_timeout: Duration::from_secs(20),
            metric_window: chrono::Duration::minutes(10),
            log_window: chrono::Duration::hours(1),
            max_log_entries: 10,
        })
    }

    pub fn with_endpoint(mut self, management: &str) -> ConnectorResult<Self> {
        self.management_endpoint = base_url(management)?;
        Ok(self)
    }

    /// Build from a variable lookup; `from_env` passes `std::env::var`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConnectorResult<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConnectorError::MissingCredentials(name.to_string()))
        };

        let mut config = Self::new(required(ENV_SUBSCRIPTION_ID)?, required(ENV_ACCESS_TOKEN)?)?;
        if let Some(region) = lookup(ENV_REGION).filter(|v| !v.trim().is_empty()) {
            config.region = region;
        }
        if let Some(endpoint) = lookup(ENV_MANAGEMENT_ENDPOINT) {
            config.management_endpoint = base_url(&endpoint)?;
        }
        Ok(config)
    }
}

/// Read-only client for Azure Monitor
pub struct AzureMonitorConnector {
    client: Client,
    config: AzureConfig,
}

impl AzureMonitorConnector {
    pub fn new(config: AzureConfig) -> ConnectorResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> ConnectorResult<Self> {
        Self::new(AzureConfig::from_lookup(|name| std::env::var(name).ok())?)
    }

    pub fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    fn subscription_url(&self, path: &str) -> ConnectorResult<Url> {
        Ok(self.config.management_endpoint.join(&format!(
            "subscriptions/{}/providers/{}",
            self.config.subscription_id, path
        ))?)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ConnectorResult<T> {
        send_json(request, &self.config.access_token).await
    }

    async fn list_fired_alerts(&self) -> ConnectorResult<Vec<Alert>> {
        let url = self.subscription_url("Microsoft.AlertsManagement/alerts")?;
        let request = self.client.get(url).query(&[
            ("api-version", ALERTS_API_VERSION),
            ("monitorCondition", "Fired"),
            ("timeRange", "1h"),
        ]);
        let list: ValueList<Alert> = self.send(request).await?;
        Ok(list.value)
    }

    async fn list_activity_log(&self, since: DateTime<Utc>) -> ConnectorResult<Vec<ActivityLogEvent>> {
        let url = self.subscription_url("Microsoft.Insights/eventtypes/management/values")?;
        let request = self.client.get(url).query(&[
            ("api-version", ACTIVITY_LOG_API_VERSION.to_string()),
            (
                "$filter",
                format!(
                    "eventTimestamp ge '{}'",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ),
        ]);
        let list: ValueList<ActivityLogEvent> = self.send(request).await?;
        Ok(list.value)
    }
}

#[async_trait]
impl IncidentSource for AzureMonitorConnector {
    fn provider(&self) -> &'static str {
        "azure"
    }

    async fn fetch_snapshot(&self) -> ConnectorResult<InfraSnapshot> {
        let end = Utc::now();
        let start = end - self.config.metric_window;
        let url = self.subscription_url("Microsoft.Insights/metrics")?;

        let request = self.client.get(url).query(&[
            ("api-version", METRICS_API_VERSION.to_string()),
            ("region", self.config.region.clone()),
            ("metricnamespace", VM_NAMESPACE.to_string()),
            ("metricnames", CPU_METRIC.to_string()),
            ("aggregation", "Average".to_string()),
            ("interval", "PT1M".to_string()),
            (
                "timespan",
                format!(
                    "{}/{}",
                    start.to_rfc3339_opts(SecondsFormat::Secs, true),
                    end.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ),
            ("$filter", "Microsoft.ResourceId eq '*'".to_string()),
        ]);
        let response: MetricsResponse = self.send(request).await?;

        let mut instances = Vec::new();
        for series in response.value.iter().flat_map(|m| &m.timeseries) {
            // Points come oldest first
            let Some((point, average)) = series
                .data
                .iter()
                .rev()
                .find_map(|p| p.average.map(|avg| (p, avg)))
            else {
                continue;
            };
            let observed_at = parse_timestamp(&point.time_stamp).map_err(ConnectorError::Decode)?;

            instances.push(InstanceReading {
                instance_id: series.resource_name().unwrap_or("unknown").to_string(),
                zone: None,
                cpu_utilization_percent: (average * 100.0).round() / 100.0,
                observed_at,
            });
        }

        debug!(
            subscription = %self.config.subscription_id,
            instances = instances.len(),
            "Fetched CPU utilization snapshot"
        );
        Ok(InfraSnapshot::from_instances(instances))
    }

    async fn fetch_incidents(&self) -> ConnectorResult<Vec<IncidentRecord>> {
        let now = Utc::now();
        let mut incidents = Vec::new();

        for alert in self.list_fired_alerts().await? {
            if alert.properties.essentials.alert_state.eq_ignore_ascii_case("closed") {
                continue;
            }
            incidents.push(alert_incident(&alert)?);
        }

        let mut events = self
            .list_activity_log(now - self.config.log_window)
            .await?
            .iter()
            .filter(|e| matches!(e.level.as_str(), "Critical" | "Error" | "Warning"))
            .map(activity_incident)
            .collect::<ConnectorResult<Vec<_>>>()?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(self.config.max_log_entries);
        incidents.extend(events);

        debug!(
            subscription = %self.config.subscription_id,
            incidents = incidents.len(),
            "Fetched incidents"
        );
        Ok(incidents)
    }
}

fn alert_severity(severity: &str) -> IncidentSeverity {
    match severity {
        "Sev0" => IncidentSeverity::Critical,
        "Sev1" => IncidentSeverity::High,
        "Sev2" => IncidentSeverity::Medium,
        _ => IncidentSeverity::Low,
    }
}

fn alert_incident(alert: &Alert) -> ConnectorResult<IncidentRecord> {
    let essentials = &alert.properties.essentials;
    let timestamp = parse_timestamp(&essentials.start_date_time).map_err(ConnectorError::Decode)?;
    let description = match (&essentials.description, &essentials.target_resource_name) {
        (Some(text), _) if !text.is_empty() => text.clone(),
        (_, Some(target)) => format!("Alert fired on {}", target),
        _ => format!("Alert fired: {}", alert.name),
    };
    Ok(IncidentRecord {
        id: alert.id.rsplit('/').next().unwrap_or(&alert.id).to_string(),
        name: format!("TRIGGERED: {}", alert.name),
        severity: alert_severity(&essentials.severity),
        timestamp,
        description,
        kind: IncidentKind::AlertPolicy,
    })
}

fn activity_incident(event: &ActivityLogEvent) -> ConnectorResult<IncidentRecord> {
    let timestamp = parse_timestamp(&event.event_timestamp).map_err(ConnectorError::Decode)?;
    let id = event
        .event_data_id
        .clone()
        .unwrap_or_else(|| timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    let description = event
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| event.operation_name.as_ref().map(|op| op.display().to_string()))
        .unwrap_or_default();
    Ok(IncidentRecord {
        id: format!("log_{}", id),
        name: format!("Activity Log: {}", event.level),
        severity: IncidentSeverity::from_log_severity(&event.level),
        timestamp,
        description,
        kind: IncidentKind::LogEntry,
    })
}

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    value: Vec<Metric>,
}

#[derive(Debug, Deserialize)]
struct Metric {
    #[serde(default)]
    timeseries: Vec<MetricSeries>,
}

#[derive(Debug, Deserialize)]
struct MetricSeries {
    #[serde(default)]
    metadatavalues: Vec<MetadataValue>,
    #[serde(default)]
    data: Vec<MetricPoint>,
}

impl MetricSeries {
    /// Last path segment of the `Microsoft.ResourceId` dimension
    fn resource_name(&self) -> Option<&str> {
        self.metadatavalues
            .iter()
            .find(|m| m.name.value.eq_ignore_ascii_case("microsoft.resourceid"))
            .and_then(|m| m.value.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataValue {
    name: LocalizableString,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricPoint {
    time_stamp: String,
    average: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalizableString {
    #[serde(default)]
    value: String,
    localized_value: Option<String>,
}

impl LocalizableString {
    fn display(&self) -> &str {
        self.localized_value.as_deref().unwrap_or(&self.value)
    }
}

#[derive(Debug, Deserialize)]
struct Alert {
    id: String,
    #[serde(default)]
    name: String,
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    essentials: AlertEssentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertEssentials {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    alert_state: String,
    start_date_time: String,
    target_resource_name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityLogEvent {
    event_data_id: Option<String>,
    event_timestamp: String,
    #[serde(default)]
    level: String,
    operation_name: Option<LocalizableString>,
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoadStatus;
    use mockito::{Matcher, Server, ServerGuard};

    const METRICS: &str = r#"{
      "value": [{
        "name": {"value": "Percentage CPU", "localizedValue": "Percentage CPU"},
        "timeseries": [
          {
            "metadatavalues": [{"name": {"value": "microsoft.resourceid"},
              "value": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-web"}],
            "data": [
              {"timeStamp": "2025-05-01T10:04:00Z", "average": 40.0},
              {"timeStamp": "2025-05-01T10:05:00Z", "average": 91.256},
              {"timeStamp": "2025-05-01T10:06:00Z"}
            ]
          },
          {
            "metadatavalues": [{"name": {"value": "microsoft.resourceid"},
              "value": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-db"}],
            "data": [{"timeStamp": "2025-05-01T10:03:00Z", "average": 12.0}]
          },
          {"metadatavalues": [], "data": []}
        ]
      }]
    }"#;

    const ALERTS: &str = r#"{
      "value": [
        {
          "id": "/subscriptions/sub-1/providers/Microsoft.AlertsManagement/alerts/a-1",
          "name": "VM CPU above 90%",
          "properties": {"essentials": {
            "severity": "Sev1", "alertState": "New", "monitorCondition": "Fired",
            "startDateTime": "2025-05-01T10:05:30Z", "targetResourceName": "vm-web"
          }}
        },
        {
          "id": "/subscriptions/sub-1/providers/Microsoft.AlertsManagement/alerts/a-2",
          "name": "Stale alert",
          "properties": {"essentials": {
            "severity": "Sev3", "alertState": "Closed",
            "startDateTime": "2025-05-01T09:00:00Z"
          }}
        }
      ]
    }"#;

    const ACTIVITY: &str = r#"{
      "value": [
        {"eventDataId": "ev-1", "eventTimestamp": "2025-05-01T09:50:00Z", "level": "Informational",
         "operationName": {"value": "Microsoft.Compute/virtualMachines/start/action"}},
        {"eventDataId": "ev-2", "eventTimestamp": "2025-05-01T09:55:00Z", "level": "Error",
         "operationName": {"value": "Microsoft.Compute/virtualMachines/delete",
                           "localizedValue": "Delete Virtual Machine"}},
        {"eventDataId": "ev-3", "eventTimestamp": "2025-05-01T09:58:00Z", "level": "Warning",
         "description": "Role assignment changed"}
      ]
    }"#;

    fn connector(server: &ServerGuard) -> AzureMonitorConnector {
        let config = AzureConfig::new("sub-1", "test-token")
            .unwrap()
            .with_endpoint(&server.url())
            .unwrap();
        AzureMonitorConnector::new(config).unwrap()
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = [
            (ENV_SUBSCRIPTION_ID, "sub-1"),
            (ENV_ACCESS_TOKEN, "token"),
            (ENV_REGION, "westeurope"),
            (ENV_MANAGEMENT_ENDPOINT, "http://127.0.0.1:9000/arm"),
        ];
        let lookup = |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        };
        let config = AzureConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.region, "westeurope");
        assert_eq!(config.management_endpoint.as_str(), "http://127.0.0.1:9000/arm/");

        let err = AzureConfig::from_lookup(|name| {
            (name == ENV_SUBSCRIPTION_ID).then(|| "sub-1".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConnectorError::MissingCredentials(ref v) if v == ENV_ACCESS_TOKEN));
    }

    #[test]
    fn test_alert_severity_scale() {
        assert_eq!(alert_severity("Sev0"), IncidentSeverity::Critical);
        assert_eq!(alert_severity("Sev1"), IncidentSeverity::High);
        assert_eq!(alert_severity("Sev2"), IncidentSeverity::Medium);
        assert_eq!(alert_severity("Sev4"), IncidentSeverity::Low);
    }

    #[tokio::test]
    async fn test_snapshot_uses_latest_average_per_vm() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/subscriptions/sub-1/providers/Microsoft.Insights/metrics")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("metricnames".into(), "Percentage CPU".into()),
                Matcher::UrlEncoded("region".into(), "eastus".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(METRICS)
            .create_async()
            .await;

        let snapshot = connector(&server).fetch_snapshot().await.unwrap();
        mock.assert_async().await;

        assert_eq!(snapshot.instances.len(), 2);
        assert_eq!(snapshot.instances[0].instance_id, "vm-web");
        assert_eq!(snapshot.cpu_utilization_percent, Some(91.26));
        assert_eq!(snapshot.load, LoadStatus::Critical);
    }

    #[tokio::test]
    async fn test_alerts_and_activity_log() {
        let mut server = Server::new_async().await;
        let _alerts = server
            .mock("GET", "/subscriptions/sub-1/providers/Microsoft.AlertsManagement/alerts")
            .match_query(Matcher::UrlEncoded("monitorCondition".into(), "Fired".into()))
            .with_status(200)
            .with_body(ALERTS)
            .create_async()
            .await;
        let _activity = server
            .mock(
                "GET",
                "/subscriptions/sub-1/providers/Microsoft.Insights/eventtypes/management/values",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(ACTIVITY)
            .create_async()
            .await;

        let incidents = connector(&server).fetch_incidents().await.unwrap();
        assert_eq!(incidents.len(), 3);

        assert_eq!(incidents[0].id, "a-1");
        assert_eq!(incidents[0].kind, IncidentKind::AlertPolicy);
        assert_eq!(incidents[0].severity, IncidentSeverity::High);
        assert_eq!(incidents[0].description, "Alert fired on vm-web");

        // newest activity first
        assert_eq!(incidents[1].id, "log_ev-3");
        assert_eq!(incidents[1].severity, IncidentSeverity::Medium);
        assert_eq!(incidents[1].description, "Role assignment changed");
        assert_eq!(incidents[2].description, "Delete Virtual Machine");
        assert_eq!(incidents[2].severity, IncidentSeverity::High);
    }

    #[tokio::test]
    async fn test_forbidden_is_authentication_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error": {"code": "AuthorizationFailed"}}"#)
            .create_async()
            .await;

        let err = connector(&server).fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/subscriptions/sub-1/providers/Microsoft.Insights/metrics")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value": [{"timeseries": [{"data": [{"average": 5.0}]}]}]}"#)
            .create_async()
            .await;

        let err = connector(&server).fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Decode(_)));
    }
}
