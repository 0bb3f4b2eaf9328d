//! Dashboard status

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ResultsResponse};
use crate::output::{
    color_status, format_percent, format_score, print_json, print_table, OutputFormat,
};

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Score")]
    score: String,
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    health: Option<&'a HealthResponse>,
    results: &'a ResultsResponse,
}

/// Print the latest results and health of a running dashboard
pub async fn show_status(url: &str, format: OutputFormat) -> Result<()> {
    let client = ApiClient::new(url)?;
    let results: ResultsResponse = client.get("api/v1/results").await?;
    // Health is informational; an old or proxied dashboard may not expose it
    let health: Option<HealthResponse> = client.get_health("healthz").await.ok();

    match format {
        OutputFormat::Json => print_json(&StatusOutput {
            health: health.as_ref(),
            results: &results,
        })?,
        OutputFormat::Table => print_status(url, health.as_ref(), &results),
    }

    Ok(())
}

fn print_status(url: &str, health: Option<&HealthResponse>, results: &ResultsResponse) {
    println!("{} {}", "Dashboard".bold(), url.dimmed());
    println!("{}", "=".repeat(50));
    if let Some(health) = health {
        println!("Health:                 {}", color_status(&health.status));
        for (name, component) in &health.components {
            if let Some(message) = &component.message {
                println!(
                    "  {:<21} {} ({})",
                    name,
                    color_status(&component.status),
                    message
                );
            }
        }
    }
    println!(
        "Last refresh:           {} (cycle {}, {})",
        results.refreshed_at, results.cycle, results.origin.kind
    );
    println!();

    let current = &results.current;
    let state = if current.anomaly_detected {
        "ANOMALY".red().bold().to_string()
    } else {
        "NORMAL".green().to_string()
    };
    println!("{}", "Current Status".bold());
    println!("{}", "-".repeat(50));
    println!(
        "State:                  {} (score {})",
        state,
        format_score(current.anomaly_score)
    );
    for (name, value) in &current.current_metrics {
        println!("  {:<21} {:.3}", name, value);
    }
    println!();

    let summary = &results.summary;
    println!("{}", "Window".bold());
    println!("{}", "-".repeat(50));
    println!("Data points:            {}", summary.total_points);
    println!(
        "Anomalies:              {} ({})",
        summary.total_anomalies,
        format_percent(summary.anomaly_rate_percent)
    );
    println!();

    let rows: Vec<AlertRow> = results
        .recent_alerts
        .iter()
        .map(|alert| AlertRow {
            time: alert.timestamp.clone(),
            score: format!("{:.4}", alert.score),
        })
        .collect();
    print_table(&rows, "No recent alerts");
}
