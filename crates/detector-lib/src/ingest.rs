//! Metric ingestion from CSV and JSON files
//!
//! Both formats share the same column rules: a `timestamp` column plus one
//! column per metric. Columns produced by our own reports and exports
//! (`is_anomaly`, `anomaly`, `anomaly_score`, `attack_type`) are ignored so
//! those files can be read back.

use crate::error::{PipelineError, Result};
use crate::models::{AttackKind, MetricSample};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Name of the mandatory timestamp column
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Output columns that are never treated as metrics
const IGNORED_COLUMNS: &[&str] = &["is_anomaly", "anomaly", "anomaly_score", LABEL_COLUMN];

/// Attack label column of exported simulations
pub const LABEL_COLUMN: &str = "attack_type";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Load samples from a file, choosing the parser by extension
pub fn load_file(path: &Path) -> Result<Vec<MetricSample>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let samples = match extension.as_deref() {
        Some("csv") => read_csv(std::fs::File::open(path)?)?,
        Some("json") => read_json(std::fs::File::open(path)?)?,
        _ => {
            return Err(PipelineError::Malformed(format!(
                "unsupported input format: {}",
                path.display()
            )))
        }
    };

    debug!(path = %path.display(), samples = samples.len(), "Loaded metric samples");
    Ok(samples)
}

/// Parse CSV with a header row
pub fn read_csv<R: std::io::Read>(reader: R) -> Result<Vec<MetricSample>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let ts_idx = headers
        .iter()
        .position(|h| h.trim() == TIMESTAMP_COLUMN)
        .ok_or_else(|| PipelineError::Malformed("missing timestamp column".to_string()))?;

    let mut samples = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_ts = record.get(ts_idx).unwrap_or_default();
        let mut sample = MetricSample::new(parse_timestamp(raw_ts).map_err(|e| {
            PipelineError::Malformed(format!("row {}: {}", line + 1, e))
        })?);

        for (idx, name) in headers.iter().enumerate() {
            let name = name.trim();
            if idx == ts_idx || is_ignored(name) {
                continue;
            }
            // Empty and non-numeric cells are missing readings
            if let Some(value) = record
                .get(idx)
                .and_then(|cell| cell.trim().parse::<f64>().ok())
            {
                sample.readings.insert(name.to_string(), value);
            }
        }
        samples.push(sample);
    }

    Ok(samples)
}

/// Parse a JSON array of flat objects
pub fn read_json<R: std::io::Read>(reader: R) -> Result<Vec<MetricSample>> {
    let value: Value = serde_json::from_reader(reader)?;
    let rows = value
        .as_array()
        .ok_or_else(|| PipelineError::Malformed("expected a JSON array of objects".to_string()))?;

    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            row.as_object()
                .ok_or_else(|| PipelineError::Malformed(format!("row {} is not an object", idx)))
                .and_then(|obj| sample_from_object(idx, obj))
        })
        .collect()
}

fn sample_from_object(idx: usize, obj: &Map<String, Value>) -> Result<MetricSample> {
    let raw_ts = obj
        .get(TIMESTAMP_COLUMN)
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::Malformed(format!("row {}: missing timestamp", idx)))?;

    let mut sample = MetricSample::new(
        parse_timestamp(raw_ts).map_err(|e| PipelineError::Malformed(format!("row {}: {}", idx, e)))?,
    );

    for (name, value) in obj {
        if name == TIMESTAMP_COLUMN || is_ignored(name) {
            continue;
        }
        if let Some(v) = value.as_f64() {
            sample.readings.insert(name.clone(), v);
        }
    }

    Ok(sample)
}

/// Write samples as CSV, one column per metric seen in any sample.
///
/// With `labels`, an `attack_type` column holds the injected attack of each
/// row (empty for normal traffic).
pub fn write_csv<W: std::io::Write>(
    writer: W,
    samples: &[MetricSample],
    labels: Option<&[Option<AttackKind>]>,
) -> Result<()> {
    if let Some(labels) = labels {
        if labels.len() != samples.len() {
            return Err(PipelineError::invalid(
                "labels",
                format!("{} labels for {} samples", labels.len(), samples.len()),
            ));
        }
    }

    let metrics: BTreeSet<&str> = samples
        .iter()
        .flat_map(|s| s.readings.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![TIMESTAMP_COLUMN];
    header.extend(metrics.iter().copied());
    if labels.is_some() {
        header.push(LABEL_COLUMN);
    }
    wtr.write_record(&header)?;

    for (idx, sample) in samples.iter().enumerate() {
        let mut record = vec![sample.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)];
        record.extend(
            metrics
                .iter()
                .map(|name| sample.get(name).map(|v| v.to_string()).unwrap_or_default()),
        );
        if let Some(labels) = labels {
            record.push(labels[idx].map(|k| k.as_str().to_string()).unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Parse an RFC 3339 timestamp or a naive one interpreted as UTC
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

fn is_ignored(column: &str) -> bool {
    IGNORED_COLUMNS.contains(&column)
}
