//! Unsupervised anomaly scoring
//!
//! The scorer fits an outlier model on the feature matrix it is asked to
//! score and turns the per-row decision values into verdicts. The expected
//! anomaly share (contamination) is always configured, never inferred.

mod isolation_forest;

pub use isolation_forest::IsolationForest;

use crate::config::{validate_contamination, DetectorConfig};
use crate::error::{PipelineError, Result};
use crate::models::{AnomalyVerdict, FeatureMatrix};
use tracing::debug;

/// Model producing one decision value per row; negative means outlier
pub trait OutlierModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit_decision(&self, rows: &[Vec<f64>], contamination: f64, seed: u64) -> Result<Vec<f64>>;
}

/// Scores feature matrices with a fixed contamination and seed
pub struct AnomalyScorer {
    contamination: f64,
    seed: u64,
    model: Box<dyn OutlierModel>,
}

impl AnomalyScorer {
    /// Isolation Forest scorer with default forest size
    pub fn new(contamination: f64, seed: u64) -> Result<Self> {
        Self::with_model(contamination, seed, Box::new(IsolationForest::default()))
    }

    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        Self::with_model(
            config.contamination,
            config.random_seed,
            Box::new(IsolationForest::new(config.n_estimators, config.max_samples)),
        )
    }

    pub fn with_model(contamination: f64, seed: u64, model: Box<dyn OutlierModel>) -> Result<Self> {
        validate_contamination(contamination)?;
        Ok(Self {
            contamination,
            seed,
            model,
        })
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// One verdict per row, in row order
    pub fn score(&self, features: &FeatureMatrix) -> Result<Vec<AnomalyVerdict>> {
        if features.is_empty() {
            return Err(PipelineError::InsufficientData {
                required: 1,
                got: 0,
            });
        }

        let width = features.names.len();
        for (idx, row) in features.rows.iter().enumerate() {
            if row.values.len() != width {
                return Err(PipelineError::Malformed(format!(
                    "feature row {} has {} values, expected {}",
                    idx,
                    row.values.len(),
                    width
                )));
            }
            if row.values.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Malformed(format!(
                    "feature row {} contains a non-finite value",
                    idx
                )));
            }
        }

        let decisions = self
            .model
            .fit_decision(&features.values(), self.contamination, self.seed)?;

        if decisions.len() != features.len() {
            return Err(PipelineError::Malformed(format!(
                "{} returned {} scores for {} rows",
                self.model.name(),
                decisions.len(),
                features.len()
            )));
        }

        let verdicts: Vec<AnomalyVerdict> = features
            .rows
            .iter()
            .zip(decisions)
            .map(|(row, score)| AnomalyVerdict {
                timestamp: row.timestamp,
                is_anomaly: score < 0.0,
                score,
            })
            .collect();

        debug!(
            model = self.model.name(),
            rows = verdicts.len(),
            flagged = verdicts.iter().filter(|v| v.is_anomaly).count(),
            "Scored feature matrix"
        );

        Ok(verdicts)
    }
}
