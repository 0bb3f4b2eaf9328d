//! Configuration management for the CLI
//!
//! Detector options come from `DetectorConfig` (file plus `CTD_*`
//! environment). This file only holds CLI preferences.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default dashboard location when nothing else is configured
pub const DEFAULT_DASHBOARD_HOST: &str = "http://localhost";

/// CLI preferences stored in `~/.config/ctd/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Dashboard URL used by `ctd status`
    pub dashboard_url: Option<String>,
    /// Detector configuration file used when `--config` is not given
    pub detector_config: Option<PathBuf>,
}

impl Config {
    /// Load preferences from the default location
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load preferences from a file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read CLI config file")?;

        serde_json::from_str(&content).context("Failed to parse CLI config file")
    }

    /// Detector configuration file: the explicit flag wins over preferences
    pub fn detector_config_path(&self, flag: Option<PathBuf>) -> Option<PathBuf> {
        flag.or_else(|| self.detector_config.clone())
    }

    /// Dashboard URL: the explicit flag wins, then preferences, then the
    /// configured dashboard port on localhost
    pub fn dashboard_url(&self, flag: Option<String>, port: u16) -> String {
        flag.or_else(|| self.dashboard_url.clone())
            .unwrap_or_else(|| format!("{}:{}", DEFAULT_DASHBOARD_HOST, port))
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("ctd").join("config.json"))
    }
}
