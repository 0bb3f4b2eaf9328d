//! "Current anomaly" snapshot files
//!
//! The CSV holds every scored row and can be ingested again; the JSON
//! describes only the most recent time step plus running totals.

use crate::error::Result;
use crate::pipeline::AnalysisResult;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contents of `current_anomaly.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAnomaly {
    pub timestamp: Option<DateTime<Utc>>,
    pub current_metrics: BTreeMap<String, f64>,
    pub anomaly_detected: bool,
    pub anomaly_score: Option<f64>,
    pub total_anomalies: usize,
    /// Percent of rows flagged
    pub anomaly_rate: f64,
}

impl CurrentAnomaly {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let latest = result.latest();
        Self {
            timestamp: latest.map(|r| r.timestamp),
            current_metrics: latest.map(|r| r.readings.clone()).unwrap_or_default(),
            anomaly_detected: latest.map(|r| r.is_anomaly).unwrap_or(false),
            anomaly_score: latest.map(|r| r.score),
            total_anomalies: result.anomaly_count(),
            anomaly_rate: round2(result.anomaly_rate()),
        }
    }
}

/// Render all rows as CSV: timestamp, metrics, is_anomaly, anomaly_score
pub fn rows_csv(result: &AnalysisResult) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["timestamp".to_string()];
    header.extend(result.metric_names.iter().cloned());
    header.push("is_anomaly".to_string());
    header.push("anomaly_score".to_string());
    writer.write_record(&header)?;

    for row in &result.rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        for name in &result.metric_names {
            record.push(
                row.readings
                    .get(name)
                    .map(|v| format!("{:.6}", v))
                    .unwrap_or_default(),
            );
        }
        record.push(row.is_anomaly.to_string());
        record.push(format!("{:.6}", row.score));
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()).into())
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
