//! End-to-end detection run
//!
//! Preprocess, extract features and score one batch of samples. A run is
//! synchronous and self-contained; callers that need periodic runs (the
//! dashboard) schedule them and keep only the latest result.

use crate::config::DetectorConfig;
use crate::error::{PipelineError, Result};
use crate::evaluation::DetectionMetrics;
use crate::ingest;
use crate::models::{AnomalyVerdict, MetricSample, Severity};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::preprocess::{FeatureExtractor, Preprocessor};
use crate::scorer::AnomalyScorer;
use crate::simulator::{self, SimulationConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;

/// One scored time step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub timestamp: DateTime<Utc>,
    /// Gap-filled readings in original units
    pub readings: BTreeMap<String, f64>,
    pub is_anomaly: bool,
    pub score: f64,
}

impl ResultRow {
    pub fn severity(&self) -> Option<Severity> {
        self.is_anomaly.then(|| Severity::from_score(self.score))
    }
}

/// Output of a single pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub metric_names: Vec<String>,
    pub rows: Vec<ResultRow>,
    /// Present when ground truth was supplied
    pub evaluation: Option<DetectionMetrics>,
    pub filled_gaps: usize,
}

impl AnalysisResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_anomaly).count()
    }

    /// Share of flagged rows in percent
    pub fn anomaly_rate(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        self.anomaly_count() as f64 / self.rows.len() as f64 * 100.0
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter().filter(|r| r.is_anomaly)
    }

    pub fn latest(&self) -> Option<&ResultRow> {
        self.rows.last()
    }
}

/// Preprocess → features → score
pub struct Pipeline {
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
    scorer: AnomalyScorer,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            preprocessor: Preprocessor::new(),
            extractor: FeatureExtractor::new(config.rolling_window),
            scorer: AnomalyScorer::from_config(config)?,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("pipeline"),
        })
    }

    /// Score one batch. `truth`, when given, must have one flag per sample.
    pub fn run(&self, samples: &[MetricSample], truth: Option<&[bool]>) -> Result<AnalysisResult> {
        let started = Instant::now();
        match self.run_inner(samples, truth) {
            Ok(result) => {
                let elapsed = started.elapsed();
                self.metrics.record_run(
                    elapsed.as_secs_f64(),
                    result.len(),
                    result.anomaly_count(),
                );
                for row in result.anomalies() {
                    self.logger.log_anomaly(
                        &row.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                        row.score,
                        Severity::from_score(row.score),
                    );
                }
                self.logger.log_pipeline_completed(
                    result.len(),
                    result.anomaly_count(),
                    result.filled_gaps,
                    elapsed.as_millis() as u64,
                );
                Ok(result)
            }
            Err(e) => {
                self.metrics.inc_run_errors();
                self.logger.log_pipeline_failed(&e);
                Err(e)
            }
        }
    }

    fn run_inner(&self, samples: &[MetricSample], truth: Option<&[bool]>) -> Result<AnalysisResult> {
        if let Some(truth) = truth {
            if truth.len() != samples.len() {
                return Err(PipelineError::invalid(
                    "labels",
                    format!("{} labels for {} samples", truth.len(), samples.len()),
                ));
            }
        }

        let series = self.preprocessor.clean(samples)?;
        let features = self.extractor.extract(&series);
        let verdicts = self.scorer.score(&features)?;

        let rows = verdicts
            .iter()
            .enumerate()
            .map(|(idx, verdict)| ResultRow {
                timestamp: verdict.timestamp,
                readings: series
                    .raw_row(idx)
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
                is_anomaly: verdict.is_anomaly,
                score: verdict.score,
            })
            .collect();

        Ok(AnalysisResult {
            metric_names: series.metric_names.clone(),
            rows,
            evaluation: truth.map(|t| DetectionMetrics::compare(t, &verdicts)),
            filled_gaps: series.filled_gaps,
        })
    }

    /// Verdicts only, without readings or evaluation
    pub fn verdicts(&self, samples: &[MetricSample]) -> Result<Vec<AnomalyVerdict>> {
        let series = self.preprocessor.clean(samples)?;
        self.scorer.score(&self.extractor.extract(&series))
    }

    /// Run a loaded batch. A file batch that fails on a data error (too few
    /// rows, unordered timestamps, an empty column) is replaced once by
    /// simulated data tagged `SimulatedFallback`.
    pub fn run_with_fallback(
        &self,
        config: &DetectorConfig,
        data: LoadedData,
    ) -> Result<(AnalysisResult, LoadedData)> {
        let err = match self.run(&data.samples, data.truth()) {
            Ok(result) => return Ok((result, data)),
            Err(e) => e,
        };

        let DataOrigin::File { path } = data.origin else {
            return Err(err);
        };
        if !err.is_data_error() {
            return Err(err);
        }

        warn!(
            path = %path.display(),
            error = %err,
            "Input data unusable, falling back to simulated data"
        );
        let fallback = simulate(
            &simulation_config(config),
            DataOrigin::SimulatedFallback {
                path,
                reason: err.to_string(),
            },
        )?;
        let result = self.run(&fallback.samples, fallback.truth())?;
        Ok((result, fallback))
    }
}

/// Where a batch of samples came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataOrigin {
    File { path: PathBuf },
    Simulated,
    /// Simulated because the configured file could not be used
    SimulatedFallback { path: PathBuf, reason: String },
}

/// Samples ready for a run, with ground truth when simulated
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub samples: Vec<MetricSample>,
    pub truth: Option<Vec<bool>>,
    pub origin: DataOrigin,
}

impl LoadedData {
    pub fn truth(&self) -> Option<&[bool]> {
        self.truth.as_deref()
    }
}

pub fn simulation_config(config: &DetectorConfig) -> SimulationConfig {
    SimulationConfig {
        days: config.simulation_days,
        attack_intensity: config.attack_intensity,
        seed: config.random_seed,
        start: None,
    }
}

/// Read the configured input file, or simulate when none is set
pub fn load_samples(config: &DetectorConfig) -> Result<LoadedData> {
    match &config.input_path {
        Some(path) => Ok(LoadedData {
            samples: ingest::load_file(path)?,
            truth: None,
            origin: DataOrigin::File { path: path.clone() },
        }),
        None => simulate(&simulation_config(config), DataOrigin::Simulated),
    }
}

/// Like `load_samples`, but a file that cannot be read or parsed is
/// replaced by simulated data
pub fn load_with_fallback(config: &DetectorConfig) -> Result<LoadedData> {
    match load_samples(config) {
        Ok(data) => Ok(data),
        Err(e) => {
            let Some(path) = config.input_path.clone() else {
                return Err(e);
            };
            warn!(
                path = %path.display(),
                error = %e,
                "Input unusable, falling back to simulated data"
            );
            simulate(
                &simulation_config(config),
                DataOrigin::SimulatedFallback {
                    path,
                    reason: e.to_string(),
                },
            )
        }
    }
}

fn simulate(config: &SimulationConfig, origin: DataOrigin) -> Result<LoadedData> {
    let dataset = simulator::simulate(config)?;
    Ok(LoadedData {
        truth: Some(dataset.truth()),
        samples: dataset.samples,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metric;
    use chrono::{Duration, TimeZone};
    use std::io::Write;

    fn config() -> DetectorConfig {
        DetectorConfig {
            simulation_days: 2,
            n_estimators: 50,
            ..DetectorConfig::default()
        }
    }

    fn samples(n: usize) -> Vec<MetricSample> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                MetricSample::new(start + Duration::hours(i as i64))
                    .with_reading(metric::CPU_USAGE, 0.3 + (i % 4) as f64 * 0.05)
                    .with_reading(metric::LOGIN_ATTEMPTS, if i == n - 1 { 90.0 } else { 2.0 })
            })
            .collect()
    }

    #[test]
    fn test_run_keeps_one_row_per_sample() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let input = samples(30);
        let result = pipeline.run(&input, None).unwrap();

        assert_eq!(result.len(), input.len());
        assert!(result.evaluation.is_none());
        for (row, sample) in result.rows.iter().zip(&input) {
            assert_eq!(row.timestamp, sample.timestamp);
            assert_eq!(row.readings.len(), 2);
        }
        assert!(result.rows.last().unwrap().is_anomaly);
    }

    #[test]
    fn test_run_fills_gaps_in_readings() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let mut input = samples(10);
        input[4].readings.remove(metric::CPU_USAGE);
        let result = pipeline.run(&input, None).unwrap();
        assert_eq!(result.filled_gaps, 1);
        assert!(result.rows[4].readings.contains_key(metric::CPU_USAGE));
    }

    #[test]
    fn test_run_rejects_label_mismatch() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let err = pipeline.run(&samples(5), Some(&[true])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
    }

    #[test]
    fn test_run_with_truth_evaluates() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let input = samples(20);
        let mut truth = vec![false; 20];
        truth[19] = true;
        let result = pipeline.run(&input, Some(truth.as_slice())).unwrap();
        let evaluation = result.evaluation.unwrap();
        assert_eq!(evaluation.total(), 20);
        assert_eq!(evaluation.true_positives, 1);
    }

    #[test]
    fn test_insufficient_data_propagates() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        assert!(matches!(
            pipeline.run(&samples(1), None),
            Err(PipelineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_load_samples_simulates_by_default() {
        let data = load_samples(&config()).unwrap();
        assert_eq!(data.samples.len(), 49);
        assert_eq!(data.origin, DataOrigin::Simulated);
        assert_eq!(data.truth().map(|t| t.len()), Some(49));
    }

    #[test]
    fn test_load_with_fallback_on_bad_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "when,cpu_usage").unwrap();
        let cfg = DetectorConfig {
            input_path: Some(file.path().to_path_buf()),
            ..config()
        };

        assert!(load_samples(&cfg).is_err());
        let data = load_with_fallback(&cfg).unwrap();
        assert!(matches!(data.origin, DataOrigin::SimulatedFallback { .. }));
        assert!(data.truth.is_some());
    }

    #[test]
    fn test_load_samples_from_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,cpu_usage").unwrap();
        writeln!(file, "2025-01-01 00:00:00,0.2").unwrap();
        writeln!(file, "2025-01-01 01:00:00,0.4").unwrap();
        let cfg = DetectorConfig {
            input_path: Some(file.path().to_path_buf()),
            ..config()
        };
        let data = load_samples(&cfg).unwrap();
        assert_eq!(data.samples.len(), 2);
        assert!(data.truth.is_none());
    }

    fn file_batch(rows: &[&str]) -> (tempfile::NamedTempFile, LoadedData) {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,cpu_usage").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        let data = LoadedData {
            samples: ingest::load_file(file.path()).unwrap(),
            truth: None,
            origin: DataOrigin::File {
                path: file.path().to_path_buf(),
            },
        };
        (file, data)
    }

    #[test]
    fn test_short_file_falls_back_to_simulation() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let (_file, data) = file_batch(&["2025-01-01 00:00:00,0.2"]);

        let (result, used) = pipeline.run_with_fallback(&config(), data).unwrap();

        assert_eq!(result.len(), 49);
        assert!(result.evaluation.is_some());
        match used.origin {
            DataOrigin::SimulatedFallback { reason, .. } => {
                assert!(reason.contains("Insufficient data"))
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[test]
    fn test_unordered_file_falls_back_to_simulation() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let (_file, data) = file_batch(&[
            "2025-01-01 02:00:00,0.2",
            "2025-01-01 01:00:00,0.4",
            "2025-01-01 03:00:00,0.3",
        ]);

        let (_, used) = pipeline.run_with_fallback(&config(), data).unwrap();
        assert!(matches!(used.origin, DataOrigin::SimulatedFallback { .. }));
    }

    #[test]
    fn test_usable_file_is_kept() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let rows: Vec<String> = (0..12)
            .map(|h| format!("2025-01-01 {:02}:00:00,{}", h, 0.2 + h as f64 * 0.01))
            .collect();
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        let (_file, data) = file_batch(&rows);

        let (result, used) = pipeline.run_with_fallback(&config(), data).unwrap();
        assert_eq!(result.len(), 12);
        assert!(matches!(used.origin, DataOrigin::File { .. }));
    }

    #[test]
    fn test_simulated_batch_errors_are_not_replaced() {
        let pipeline = Pipeline::from_config(&config()).unwrap();
        let data = LoadedData {
            samples: samples(1),
            truth: None,
            origin: DataOrigin::Simulated,
        };
        assert!(matches!(
            pipeline.run_with_fallback(&config(), data),
            Err(PipelineError::InsufficientData { .. })
        ));
    }
}
