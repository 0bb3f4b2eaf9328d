//! Cloud incident listing

use anyhow::{Context, Result};
use colored::Colorize;
use detector_lib::{
    cloud::{self, IncidentSource},
    models::{IncidentRecord, InfraSnapshot},
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{color_status, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Incident")]
    name: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Serialize)]
struct IncidentsOutput<'a> {
    provider: &'a str,
    incidents: &'a [IncidentRecord],
    snapshot: &'a InfraSnapshot,
}

/// Fetch and print incidents; any connector failure is an error
pub async fn list_incidents(format: OutputFormat) -> Result<()> {
    let connector = cloud::connector_from_env()?.context(
        "Cloud credentials not set (export GCP_PROJECT_ID and GCP_ACCESS_TOKEN, \
         or AZURE_SUBSCRIPTION_ID and AZURE_ACCESS_TOKEN)",
    )?;

    let (incidents, snapshot) =
        tokio::try_join!(connector.fetch_incidents(), connector.fetch_snapshot())
            .with_context(|| format!("Failed to query {}", connector.provider()))?;

    match format {
        OutputFormat::Json => print_json(&IncidentsOutput {
            provider: connector.provider(),
            incidents: &incidents,
            snapshot: &snapshot,
        })?,
        OutputFormat::Table => {
            println!(
                "{} {}",
                "Cloud Incidents".bold(),
                format!("(project {})", connector.project_id()).dimmed()
            );
            println!("{}", "=".repeat(50));
            match snapshot.cpu_utilization_percent {
                Some(cpu) => println!(
                    "CPU utilization:        {:.1}% ({}) across {} instance(s)",
                    cpu,
                    color_status(&format!("{:?}", snapshot.load).to_lowercase()),
                    snapshot.instances.len()
                ),
                None => println!("CPU utilization:        {}", "no data".dimmed()),
            }
            println!();

            let rows: Vec<IncidentRow> = incidents
                .iter()
                .map(|i| IncidentRow {
                    time: i.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    name: i.name.clone(),
                    severity: color_status(&i.severity.to_string()),
                    description: i.description.clone(),
                })
                .collect();
            print_table(&rows, "No active incidents");
        }
    }

    Ok(())
}
