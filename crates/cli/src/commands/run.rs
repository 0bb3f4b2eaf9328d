//! One-shot detection run

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use detector_lib::{
    cloud::{self, IncidentPanel},
    evaluation::DetectionMetrics,
    pipeline::{self, AnalysisResult, DataOrigin, Pipeline},
    report::{ArtifactEntry, Reporter},
    DetectorConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{
    color_status, format_percent, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Anomalies shown in the table view
const MAX_ALERT_ROWS: usize = 20;

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// CSV or JSON metrics file (simulates when omitted)
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Directory for report artifacts
    #[arg(long, short)]
    pub output_dir: Option<PathBuf>,

    /// Expected share of anomalous samples, in (0, 0.5]
    #[arg(long)]
    pub contamination: Option<f64>,

    /// Days of simulated traffic
    #[arg(long)]
    pub days: Option<u32>,

    /// Random seed for simulation and scoring
    #[arg(long)]
    pub seed: Option<u64>,

    /// Scale factor for injected attacks
    #[arg(long)]
    pub attack_intensity: Option<f64>,

    /// Include the cloud incident panel (needs GCP or Azure credentials)
    #[arg(long)]
    pub incidents: bool,

    /// Use simulated data when the input file cannot be used
    #[arg(long)]
    pub fallback: bool,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut DetectorConfig) {
        if let Some(input) = &self.input {
            config.input_path = Some(input.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(c) = self.contamination {
            config.contamination = c;
        }
        if let Some(days) = self.days {
            config.simulation_days = days;
        }
        if let Some(seed) = self.seed {
            config.random_seed = seed;
        }
        if let Some(intensity) = self.attack_intensity {
            config.attack_intensity = intensity;
        }
    }
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Readings")]
    readings: String,
}

/// JSON output of `ctd run`
#[derive(Serialize)]
struct RunOutput<'a> {
    origin: &'a DataOrigin,
    total_points: usize,
    total_anomalies: usize,
    anomaly_rate_percent: f64,
    filled_gaps: usize,
    evaluation: Option<DetectionMetrics>,
    incident_panel: &'a IncidentPanel,
    output_dir: &'a PathBuf,
    artifacts: &'a [ArtifactEntry],
}

/// Run detection once and write the reports
pub async fn run(mut config: DetectorConfig, args: RunArgs, format: OutputFormat) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let data = if args.fallback {
        pipeline::load_with_fallback(&config)
    } else {
        pipeline::load_samples(&config)
    }
    .context("Failed to load metrics")?;

    let pipeline = Pipeline::from_config(&config)?;
    let (result, data) = if args.fallback {
        pipeline.run_with_fallback(&config, data)
    } else {
        pipeline.run(&data.samples, data.truth()).map(|result| (result, data))
    }
    .context("Detection run failed")?;

    if let DataOrigin::SimulatedFallback { path, reason } = &data.origin {
        print_warning(&format!(
            "Could not use {} ({}); analysed simulated data instead",
            path.display(),
            reason
        ));
    }

    let panel = if args.incidents {
        collect_panel().await
    } else {
        IncidentPanel::Disabled
    };

    let manifest = Reporter::new(&config.output_dir)
        .write(&result, &panel)
        .context("Failed to write reports")?;

    match format {
        OutputFormat::Json => print_json(&RunOutput {
            origin: &data.origin,
            total_points: result.len(),
            total_anomalies: result.anomaly_count(),
            anomaly_rate_percent: result.anomaly_rate(),
            filled_gaps: result.filled_gaps,
            evaluation: result.evaluation,
            incident_panel: &panel,
            output_dir: &config.output_dir,
            artifacts: &manifest.artifacts,
        })?,
        OutputFormat::Table => print_summary(&result, &data.origin, &panel, &config),
    }

    Ok(())
}

/// Fetch the incident panel; problems are reported but never fail the run
async fn collect_panel() -> IncidentPanel {
    let panel = match cloud::connector_from_env() {
        Ok(Some(source)) => IncidentPanel::collect(Some(source.as_ref())).await,
        Ok(None) => {
            print_warning("Cloud credentials not set; incident panel omitted");
            return IncidentPanel::Disabled;
        }
        Err(e) => IncidentPanel::Unavailable {
            reason: e.to_string(),
        },
    };

    if let IncidentPanel::Unavailable { reason } = &panel {
        print_warning(&format!("Cloud incidents unavailable: {}", reason));
    }
    panel
}

fn print_summary(
    result: &AnalysisResult,
    origin: &DataOrigin,
    panel: &IncidentPanel,
    config: &DetectorConfig,
) {
    println!("{}", "Threat Detection Summary".bold());
    println!("{}", "=".repeat(50));
    let source = match origin {
        DataOrigin::File { path } => path.display().to_string(),
        DataOrigin::Simulated | DataOrigin::SimulatedFallback { .. } => {
            format!("simulated, seed {}", config.random_seed)
        }
    };
    println!("Data:                   {}", source.cyan());
    println!("Data points:            {}", result.len());
    println!(
        "Anomalies:              {} ({})",
        result.anomaly_count().to_string().red().bold(),
        format_percent(result.anomaly_rate())
    );
    if result.filled_gaps > 0 {
        println!("Filled gaps:            {}", result.filled_gaps);
    }

    if let Some(eval) = &result.evaluation {
        println!();
        println!("{}", "Detection Metrics".bold());
        println!("{}", "-".repeat(50));
        println!("Precision:              {:.3}", eval.precision);
        println!("Recall:                 {:.3}", eval.recall);
        println!("F1 score:               {:.3}", eval.f1_score);
    }

    if let Some(snapshot) = panel.snapshot() {
        println!();
        println!("{}", "Cloud Incidents".bold());
        println!("{}", "-".repeat(50));
        println!("Active incidents:       {}", panel.incidents().len());
        if let Some(cpu) = snapshot.cpu_utilization_percent {
            println!("Provider CPU:           {:.1}%", cpu);
        }
    }

    println!();
    let rows: Vec<AlertRow> = result
        .anomalies()
        .take(MAX_ALERT_ROWS)
        .map(|row| AlertRow {
            time: row.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            severity: row
                .severity()
                .map(|s| color_status(&s.to_string()))
                .unwrap_or_default(),
            score: format!("{:.4}", row.score),
            readings: row
                .readings
                .iter()
                .map(|(k, v)| format!("{}={:.2}", k, v))
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();
    print_table(&rows, "No anomalies detected");
    if result.anomaly_count() > MAX_ALERT_ROWS {
        print_info(&format!(
            "{} more anomalies in the report",
            result.anomaly_count() - MAX_ALERT_ROWS
        ));
    }

    println!();
    print_success(&format!("Reports written to {}", config.output_dir.display()));
}
