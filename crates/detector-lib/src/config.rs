//! Detector configuration
//!
//! Values come from built-in defaults, an optional TOML file and
//! `CTD_`-prefixed environment variables, in increasing precedence.
//! Cloud credentials are deliberately absent: the connector reads them
//! from its own environment variables.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CTD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Expected fraction of anomalous samples
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// Seed for the simulator and the isolation forest
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Days of simulated hourly data
    #[serde(default = "default_simulation_days")]
    pub simulation_days: u32,

    /// Scale of injected attacks (1.0 reproduces the reference scenario)
    #[serde(default = "default_attack_intensity")]
    pub attack_intensity: f64,

    /// Directory for generated reports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Dashboard refresh interval in seconds
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    /// Dashboard HTTP port
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,

    /// Rolling window length for temporal features
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Number of trees in the isolation forest
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Sub-sample size per tree
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Metrics file to analyse instead of simulated data
    #[serde(default)]
    pub input_path: Option<PathBuf>,
}

fn default_contamination() -> f64 {
    0.15
}

fn default_random_seed() -> u64 {
    42
}

fn default_simulation_days() -> u32 {
    7
}

fn default_attack_intensity() -> f64 {
    1.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_monitoring_interval() -> u64 {
    30
}

fn default_dashboard_port() -> u16 {
    8051
}

fn default_rolling_window() -> usize {
    5
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_samples() -> usize {
    256
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            random_seed: default_random_seed(),
            simulation_days: default_simulation_days(),
            attack_intensity: default_attack_intensity(),
            output_dir: default_output_dir(),
            monitoring_interval_secs: default_monitoring_interval(),
            dashboard_port: default_dashboard_port(),
            rolling_window: default_rolling_window(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            input_path: None,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from the environment only
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an optional file plus the environment
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| PipelineError::invalid("config", e.to_string()))?;

        let config: DetectorConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::invalid("config", e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check option ranges
    pub fn validate(&self) -> Result<()> {
        validate_contamination(self.contamination)?;
        if self.simulation_days == 0 {
            return Err(PipelineError::invalid(
                "simulation_days",
                "must be at least 1",
            ));
        }
        if !self.attack_intensity.is_finite() || self.attack_intensity < 0.0 {
            return Err(PipelineError::invalid(
                "attack_intensity",
                "must be a non-negative number",
            ));
        }
        if self.monitoring_interval_secs == 0 {
            return Err(PipelineError::invalid(
                "monitoring_interval_secs",
                "must be at least 1",
            ));
        }
        if self.rolling_window == 0 {
            return Err(PipelineError::invalid("rolling_window", "must be at least 1"));
        }
        if self.n_estimators == 0 {
            return Err(PipelineError::invalid("n_estimators", "must be at least 1"));
        }
        if self.max_samples < 2 {
            return Err(PipelineError::invalid("max_samples", "must be at least 2"));
        }
        Ok(())
    }
}

pub(crate) fn validate_contamination(contamination: f64) -> Result<()> {
    if contamination.is_finite() && contamination > 0.0 && contamination <= 0.5 {
        Ok(())
    } else {
        Err(PipelineError::invalid(
            "contamination",
            format!("must be in (0, 0.5], got {}", contamination),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.contamination, 0.15);
        assert_eq!(config.random_seed, 42);
        assert_eq!(config.dashboard_port, 8051);
        assert_eq!(config.output_dir, PathBuf::from("reports"));
    }

    #[test]
    fn test_contamination_bounds() {
        assert!(validate_contamination(0.1).is_ok());
        assert!(validate_contamination(0.5).is_ok());
        assert!(validate_contamination(0.0).is_err());
        assert!(validate_contamination(0.6).is_err());
        assert!(validate_contamination(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let config = DetectorConfig {
            rolling_window: 0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidParameter { ref name, .. }) if name == "rolling_window"
        ));

        let config = DetectorConfig {
            attack_intensity: -1.0,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "contamination = 0.2").unwrap();
        writeln!(file, "simulation_days = 3").unwrap();
        writeln!(file, "output_dir = \"out\"").unwrap();

        let config = DetectorConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.contamination, 0.2);
        assert_eq!(config.simulation_days, 3);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.random_seed, 42);
    }

    #[test]
    fn test_load_rejects_out_of_range_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "contamination = 0.9").unwrap();
        assert!(DetectorConfig::load_from(Some(file.path())).is_err());
    }
}
