//! Dashboard HTML page

use crate::state::{AppState, DashboardSnapshot, RECENT_ALERTS};
use askama::Template;
use chrono::SecondsFormat;
use detector_lib::{
    cloud::IncidentPanel,
    models::{LoadStatus, Severity},
    pipeline::DataOrigin,
    report::charts,
};

struct CurrentView {
    timestamp: String,
    status: &'static str,
    status_class: &'static str,
    score: String,
    readings: Vec<(String, String)>,
}

struct StatsView {
    total_points: usize,
    total_anomalies: usize,
    anomaly_rate: String,
    refreshed_at: String,
    origin: String,
    cycle: u64,
}

struct AlertView {
    timestamp: String,
    severity: String,
    score: String,
}

struct IncidentView {
    timestamp: String,
    name: String,
    severity: String,
    description: String,
}

struct PanelView {
    cpu: String,
    load: String,
    load_class: &'static str,
    incidents: Vec<IncidentView>,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    refresh_secs: u64,
    stats: Option<StatsView>,
    current: Option<CurrentView>,
    alerts: Vec<AlertView>,
    panel: Option<PanelView>,
    timeline_svg: String,
}

/// Render the page from the current state
pub async fn render_page(state: &AppState) -> askama::Result<String> {
    let latest = state.latest().await;
    let panel = state.panel().await;
    render(state.refresh_interval_secs, latest.as_deref(), &panel)
}

pub fn render(
    refresh_secs: u64,
    snapshot: Option<&DashboardSnapshot>,
    panel: &IncidentPanel,
) -> askama::Result<String> {
    let template = DashboardTemplate {
        refresh_secs,
        stats: snapshot.map(stats_view),
        current: snapshot.and_then(current_view),
        alerts: snapshot
            .map(|s| {
                s.recent_alerts(RECENT_ALERTS)
                    .into_iter()
                    .map(|row| AlertView {
                        timestamp: row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        severity: Severity::from_score(row.score).to_string(),
                        score: format!("{:.4}", row.score),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        panel: panel_view(panel),
        timeline_svg: snapshot
            .map(|s| charts::timeline(&s.result))
            .unwrap_or_default(),
    };
    template.render()
}

fn stats_view(snapshot: &DashboardSnapshot) -> StatsView {
    StatsView {
        total_points: snapshot.result.len(),
        total_anomalies: snapshot.result.anomaly_count(),
        anomaly_rate: format!("{:.2}", snapshot.result.anomaly_rate()),
        refreshed_at: snapshot
            .refreshed_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        origin: match &snapshot.origin {
            DataOrigin::File { path } => format!("file {}", path.display()),
            DataOrigin::Simulated => "simulated".to_string(),
            DataOrigin::SimulatedFallback { path, .. } => {
                format!("simulated (could not use {})", path.display())
            }
        },
        cycle: snapshot.cycle,
    }
}

fn current_view(snapshot: &DashboardSnapshot) -> Option<CurrentView> {
    let row = snapshot.result.latest()?;
    let (status, status_class) = match row.severity() {
        Some(Severity::Critical) => ("CRITICAL", "critical"),
        Some(Severity::High) => ("HIGH", "high"),
        Some(Severity::Warning) => ("WARNING", "warning"),
        None => ("NORMAL", "normal"),
    };
    Some(CurrentView {
        timestamp: row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        status,
        status_class,
        score: format!("{:.4}", row.score),
        readings: row
            .readings
            .iter()
            .map(|(name, value)| (name.clone(), format!("{:.3}", value)))
            .collect(),
    })
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
            .map(|c| format!("{:.1}%", c))
            .unwrap_or_else(|| "n/a".to_string()),
        load: format!("{:?}", snapshot.load).to_uppercase(),
        load_class: match snapshot.load {
            LoadStatus::Critical => "critical",
            LoadStatus::Warning => "warning",
            LoadStatus::Normal => "normal",
        },
        incidents: incidents
            .iter()
            .map(|i| IncidentView {
                timestamp: i.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                name: i.name.clone(),
                severity: i.severity.to_string(),
                description: i.description.clone(),
            })
            .collect(),
    })
}
