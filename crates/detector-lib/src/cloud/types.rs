//! Wire types for the Cloud Monitoring and Cloud Logging REST APIs
//!
//! Only the fields we read are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeSeriesList {
    #[serde(default)]
    pub time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeSeries {
    #[serde(default)]
    pub resource: MonitoredResource,
    #[serde(default)]
    pub metric: MetricDescriptor,
    /// Newest point first
    #[serde(default)]
    pub points: Vec<Point>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MonitoredResource {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MetricDescriptor {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Point {
    pub interval: TimeInterval,
    pub value: TypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TimeInterval {
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TypedValue {
    pub double_value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlertPolicyList {
    #[serde(default)]
    pub alert_policies: Vec<AlertPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlertPolicy {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<AlertCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AlertCondition {
    #[serde(default)]
    pub display_name: String,
    pub condition_threshold: Option<ConditionThreshold>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConditionThreshold {
    pub threshold_value: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListEntriesRequest {
    pub resource_names: Vec<String>,
    pub filter: String,
    pub order_by: String,
    pub page_size: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListEntriesResponse {
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogEntry {
    pub insert_id: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub severity: String,
    pub text_payload: Option<String>,
    pub json_payload: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn payload(&self) -> String {
        if let Some(text) = &self.text_payload {
            return text.clone();
        }
        match &self.json_payload {
            Some(serde_json::Value::Object(obj)) => obj
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| serde_json::Value::Object(obj.clone()).to_string()),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}
