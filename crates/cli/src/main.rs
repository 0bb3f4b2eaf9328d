//! Cloud Threat Detector CLI
//!
//! Runs the detection pipeline once and writes reports, exports simulated
//! datasets, lists cloud incidents and queries a running dashboard.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{incidents, run, simulate, status};
use detector_lib::DetectorConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Cloud Threat Detector CLI
#[derive(Parser)]
#[command(name = "ctd")]
#[command(author, version, about = "CLI for the Cloud Threat Detector", long_about = None)]
pub struct Cli {
    /// Detector configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run detection once and write reports
    Run(run::RunArgs),

    /// Write a simulated dataset to CSV
    Simulate(simulate::SimulateArgs),

    /// List incidents from the cloud provider
    Incidents,

    /// Show the latest results of a running dashboard
    Status {
        /// Dashboard URL (defaults to localhost on the configured port)
        #[arg(long, env = "CTD_DASHBOARD_URL")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    let preferences = config::Config::load()?;
    let config_path = preferences.detector_config_path(cli.config.clone());
    let detector_config = DetectorConfig::load_from(config_path.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            run::run(detector_config, args, cli.format).await?;
        }
        Commands::Simulate(args) => {
            simulate::simulate(&detector_config, args, cli.format)?;
        }
        Commands::Incidents => {
            incidents::list_incidents(cli.format).await?;
        }
        Commands::Status { url } => {
            let url = preferences.dashboard_url(url, detector_config.dashboard_port);
            status::show_status(&url, cli.format).await?;
        }
    }

    Ok(())
}
