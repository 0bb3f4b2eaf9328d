//! Static report generation
//!
//! Writes an HTML report with inline SVG charts, the standalone charts,
//! "current anomaly" snapshots, a JSON summary and a manifest of SHA-256
//! checksums. Nothing in the output depends on the wall clock, so the same
//! analysis always produces byte-identical files.

pub mod charts;
mod snapshot;

pub use snapshot::{rows_csv, CurrentAnomaly};

use crate::cloud::IncidentPanel;
use crate::error::Result;
use crate::evaluation::DetectionMetrics;
use crate::models::{LoadStatus, Severity};
use crate::pipeline::AnalysisResult;
use askama::Template;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snapshot::round2;
use std::path::{Path, PathBuf};
use tracing::info;

pub const HTML_REPORT: &str = "threat_detection_report.html";
pub const TIMELINE_CHART: &str = "timeline_analysis.svg";
pub const SCORES_CHART: &str = "anomaly_scores.svg";
pub const DISTRIBUTION_CHART: &str = "anomaly_distribution.svg";
pub const SNAPSHOT_CSV: &str = "current_anomaly_data.csv";
pub const SNAPSHOT_JSON: &str = "current_anomaly.json";
pub const SUMMARY_JSON: &str = "summary.json";
pub const MANIFEST_JSON: &str = "manifest.json";

/// Per-metric statistics over all rows and over flagged rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub mean: f64,
    pub max: f64,
    pub anomaly_mean: Option<f64>,
    pub anomaly_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub warning: usize,
    pub high: usize,
    pub critical: usize,
}

/// Headline numbers of one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_points: usize,
    pub total_anomalies: usize,
    pub anomaly_rate_percent: f64,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub filled_gaps: usize,
    pub metrics: Vec<MetricSummary>,
    pub severity: SeverityCounts,
    pub evaluation: Option<DetectionMetrics>,
}

impl ReportSummary {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let metrics = result
            .metric_names
            .iter()
            .map(|name| {
                let all: Vec<f64> = result
                    .rows
                    .iter()
                    .filter_map(|r| r.readings.get(name).copied())
                    .collect();
                let flagged: Vec<f64> = result
                    .anomalies()
                    .filter_map(|r| r.readings.get(name).copied())
                    .collect();
                MetricSummary {
                    name: name.clone(),
                    mean: mean(&all).unwrap_or(0.0),
                    max: max(&all).unwrap_or(0.0),
                    anomaly_mean: mean(&flagged),
                    anomaly_max: max(&flagged),
                }
            })
            .collect();

        let mut severity = SeverityCounts::default();
        for row in result.anomalies() {
            match Severity::from_score(row.score) {
                Severity::Warning => severity.warning += 1,
                Severity::High => severity.high += 1,
                Severity::Critical => severity.critical += 1,
            }
        }

        Self {
            total_points: result.len(),
            total_anomalies: result.anomaly_count(),
            anomaly_rate_percent: round2(result.anomaly_rate()),
            period_start: result.rows.first().map(|r| r.timestamp),
            period_end: result.rows.last().map(|r| r.timestamp),
            filled_gaps: result.filled_gaps,
            metrics,
            severity,
            evaluation: result.evaluation,
        }
    }

    pub fn period(&self) -> String {
        match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => format!("{} to {}", format_ts(&start), format_ts(&end)),
            _ => "n/a".to_string(),
        }
    }
}

/// Summary file contents: analysis numbers plus the incident panel state
#[derive(Debug, Serialize)]
struct SummaryFile<'a> {
    #[serde(flatten)]
    summary: &'a ReportSummary,
    incident_panel: &'a IncidentPanel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub file: String,
    pub bytes: usize,
    pub sha256: String,
}

/// Files written by one report run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportManifest {
    #[serde(skip)]
    pub output_dir: PathBuf,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ReportManifest {
    pub fn path_of(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }
}

struct MetricRow {
    name: String,
    mean: String,
    max: String,
    anomaly_mean: String,
    anomaly_max: String,
}

struct EvaluationView {
    precision: String,
    recall: String,
    f1_score: String,
    accuracy: String,
    true_positives: usize,
    false_positives: usize,
    true_negatives: usize,
    false_negatives: usize,
}

struct AlertRow {
    timestamp: String,
    severity: String,
    score: String,
    readings: String,
}

struct IncidentRow {
    timestamp: String,
    name: String,
    severity: String,
    description: String,
}

struct PanelView {
    cpu: String,
    load: String,
    load_class: &'static str,
    instances: usize,
    incidents: Vec<IncidentRow>,
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    summary: &'a ReportSummary,
    period: String,
    anomaly_rate: String,
    metrics: Vec<MetricRow>,
    evaluation: Option<EvaluationView>,
    alerts: Vec<AlertRow>,
    recommendations: Vec<String>,
    panel: Option<PanelView>,
    timeline_svg: &'a str,
    scores_svg: &'a str,
    distribution_svg: &'a str,
}

/// Writes report artifacts into one directory
pub struct Reporter {
    output_dir: PathBuf,
}

impl Reporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(&self, result: &AnalysisResult, panel: &IncidentPanel) -> Result<ReportManifest> {
        std::fs::create_dir_all(&self.output_dir)?;

        let summary = ReportSummary::from_result(result);
        let timeline = charts::timeline(result);
        let scores = charts::score_distribution(result);
        let distribution = charts::hourly_distribution(result);
        let html = render_html(result, &summary, panel, &timeline, &scores, &distribution)?;

        let artifacts: Vec<(&str, Vec<u8>)> = vec![
            (HTML_REPORT, html.into_bytes()),
            (TIMELINE_CHART, timeline.into_bytes()),
            (SCORES_CHART, scores.into_bytes()),
            (DISTRIBUTION_CHART, distribution.into_bytes()),
            (SNAPSHOT_CSV, rows_csv(result)?),
            (
                SNAPSHOT_JSON,
                serde_json::to_vec_pretty(&CurrentAnomaly::from_result(result))?,
            ),
            (
                SUMMARY_JSON,
                serde_json::to_vec_pretty(&SummaryFile {
                    summary: &summary,
                    incident_panel: panel,
                })?,
            ),
        ];

        let mut entries = Vec::with_capacity(artifacts.len());
        for (file, bytes) in &artifacts {
            std::fs::write(self.output_dir.join(file), bytes)?;
            entries.push(ArtifactEntry {
                file: file.to_string(),
                bytes: bytes.len(),
                sha256: hex::encode(Sha256::digest(bytes)),
            });
        }
        entries.sort_by(|a, b| a.file.cmp(&b.file));

        let manifest = ReportManifest {
            output_dir: self.output_dir.clone(),
            artifacts: entries,
        };
        std::fs::write(
            self.output_dir.join(MANIFEST_JSON),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        info!(
            output_dir = %self.output_dir.display(),
            artifacts = manifest.artifacts.len() + 1,
            anomalies = summary.total_anomalies,
            "Report written"
        );
        Ok(manifest)
    }
}

/// Render only the HTML report
pub fn render_html(
    result: &AnalysisResult,
    summary: &ReportSummary,
    panel: &IncidentPanel,
    timeline_svg: &str,
    scores_svg: &str,
    distribution_svg: &str,
) -> Result<String> {
    let template = ReportTemplate {
        summary,
        period: summary.period(),
        anomaly_rate: format!("{:.2}", summary.anomaly_rate_percent),
        metrics: summary
            .metrics
            .iter()
            .map(|m| MetricRow {
                name: m.name.clone(),
                mean: format!("{:.3}", m.mean),
                max: format!("{:.3}", m.max),
                anomaly_mean: format_opt(m.anomaly_mean),
                anomaly_max: format_opt(m.anomaly_max),
            })
            .collect(),
        evaluation: summary.evaluation.as_ref().map(|e| EvaluationView {
            precision: format!("{:.3}", e.precision),
            recall: format!("{:.3}", e.recall),
            f1_score: format!("{:.3}", e.f1_score),
            accuracy: format!("{:.3}", e.accuracy),
            true_positives: e.true_positives,
            false_positives: e.false_positives,
            true_negatives: e.true_negatives,
            false_negatives: e.false_negatives,
        }),
        alerts: result
            .anomalies()
            .map(|row| AlertRow {
                timestamp: format_ts(&row.timestamp),
                severity: Severity::from_score(row.score).to_string(),
                score: format!("{:.4}", row.score),
                readings: row
                    .readings
                    .iter()
                    .map(|(k, v)| format!("{}={:.3}", k, v))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect(),
        recommendations: recommendations(summary),
        panel: panel_view(panel),
        timeline_svg,
        scores_svg,
        distribution_svg,
    };
    Ok(template.render()?)
}

fn recommendations(summary: &ReportSummary) -> Vec<String> {
    let mut items = vec![
        "Monitor high CPU usage patterns that may indicate resource exhaustion attacks".to_string(),
        "Watch for unusual spikes in network traffic suggesting DDoS attacks".to_string(),
        "Alert on excessive login attempts indicating brute force attacks".to_string(),
        "Implement automated response systems for detected anomalies".to_string(),
    ];
    if summary.severity.critical > 0 {
        items.insert(
            0,
            format!(
                "Investigate the {} critical time step(s) in the alert log first",
                summary.severity.critical
            ),
        );
    }
    items
}

fn panel_view(panel: &IncidentPanel) -> Option<PanelView> {
    let IncidentPanel::Available {
        incidents,
        snapshot,
    } = panel
    else {
        return None;
    };

    Some(PanelView {
        cpu: snapshot
            .cpu_utilization_percent
            .map(|v| format!("{:.2}%", v))
            .unwrap_or_else(|| "n/a".to_string()),
        load: format!("{:?}", snapshot.load).to_uppercase(),
        load_class: match snapshot.load {
            LoadStatus::Normal => "normal",
            LoadStatus::Warning => "warning",
            LoadStatus::Critical => "critical",
        },
        instances: snapshot.instances.len(),
        incidents: incidents
            .iter()
            .map(|i| IncidentRow {
                timestamp: format_ts(&i.timestamp),
                name: i.name.clone(),
                severity: i.severity.to_string(),
                description: i.description.clone(),
            })
            .collect(),
    })
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn format_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}
