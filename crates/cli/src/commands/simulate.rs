//! Simulated dataset export

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use detector_lib::{
    ingest, pipeline,
    simulator::{self, CloudSimulator, SimulatedDataset},
    DetectorConfig,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{print_json, print_success, print_table, OutputFormat};

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Destination CSV file
    #[arg(long, short)]
    pub output: PathBuf,

    /// Days of simulated traffic
    #[arg(long)]
    pub days: Option<u32>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Two-hour window ending now with a traffic burst at the end, as the
    /// dashboard uses
    #[arg(long)]
    pub burst: bool,
}

#[derive(Tabled)]
struct AttackRow {
    #[tabled(rename = "Attack")]
    attack: String,
    #[tabled(rename = "Samples")]
    samples: usize,
}

/// JSON output of `ctd simulate`
#[derive(Serialize)]
struct SimulateOutput {
    output: PathBuf,
    points: usize,
    attack_points: usize,
    attacks: BTreeMap<String, usize>,
}

/// Generate a dataset and write it as CSV with an `attack_type` column
pub fn simulate(config: &DetectorConfig, args: SimulateArgs, format: OutputFormat) -> Result<()> {
    let mut sim_config = pipeline::simulation_config(config);
    if let Some(days) = args.days {
        sim_config.days = days;
    }
    if let Some(seed) = args.seed {
        sim_config.seed = seed;
    }

    let dataset: SimulatedDataset = if args.burst {
        CloudSimulator::new(sim_config.seed)
            .with_attack_intensity(sim_config.attack_intensity)
            .burst_window(Utc::now())?
    } else {
        simulator::simulate(&sim_config)?
    };

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    ingest::write_csv(file, &dataset.samples, Some(dataset.labels.as_slice()))?;

    let mut attacks = BTreeMap::new();
    for kind in dataset.labels.iter().flatten() {
        *attacks.entry(kind.as_str().to_string()).or_insert(0usize) += 1;
    }

    match format {
        OutputFormat::Json => print_json(&SimulateOutput {
            output: args.output.clone(),
            points: dataset.samples.len(),
            attack_points: dataset.attack_count(),
            attacks,
        })?,
        OutputFormat::Table => {
            print_success(&format!(
                "Wrote {} samples to {}",
                dataset.samples.len(),
                args.output.display()
            ));
            let rows: Vec<AttackRow> = attacks
                .into_iter()
                .map(|(attack, samples)| AttackRow { attack, samples })
                .collect();
            print_table(&rows, "No attacks injected");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_writes_labelled_csv() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("sim.csv");
        let args = SimulateArgs {
            output: output.clone(),
            days: Some(1),
            seed: Some(3),
            burst: false,
        };

        simulate(&DetectorConfig::default(), args, OutputFormat::Json).unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.lines().next().unwrap().ends_with(",attack_type"));
        // header plus one sample per hour, inclusive
        assert_eq!(text.lines().count(), 1 + 25);
        assert_eq!(ingest::load_file(&output).unwrap().len(), 25);
    }

    #[test]
    fn test_burst_window_export() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("burst.csv");
        let args = SimulateArgs {
            output: output.clone(),
            days: None,
            seed: None,
            burst: true,
        };

        simulate(&DetectorConfig::default(), args, OutputFormat::Table).unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.lines().count(), 1 + simulator::BURST_WINDOW_POINTS);
        assert_eq!(text.matches("traffic_burst").count(), simulator::BURST_POINTS);
    }
}
