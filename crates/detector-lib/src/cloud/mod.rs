//! Read-only cloud incident and infrastructure monitoring
//!
//! A connector pulls incidents and a CPU snapshot from a provider's
//! monitoring API. Connector output never flows back into the detection
//! pipeline; it is only rendered next to the local results.

mod azure;
mod gcp;
mod http;
mod types;


pub use azure::{AzureConfig, AzureMonitorConnector};
pub use gcp::{GcpConfig, GcpMonitoringConnector};

use crate::error::ConnectorError;
use crate::models::{IncidentRecord, InfraSnapshot};
use crate::observability::{PipelineMetrics, StructuredLogger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pins the provider when credentials for more than one are exported
pub const ENV_PROVIDER: &str = "CTD_CLOUD_PROVIDER";

/// Result type for connector operations
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Source of provider-side incidents and infrastructure metrics
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Short provider name used in logs and metrics labels
    fn provider(&self) -> &'static str;

    async fn fetch_incidents(&self) -> ConnectorResult<Vec<IncidentRecord>>;

    async fn fetch_snapshot(&self) -> ConnectorResult<InfraSnapshot>;
}

/// What reports and the dashboard show in the incident area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IncidentPanel {
    /// No connector configured
    Disabled,
    /// Connector configured but the last fetch failed
    Unavailable { reason: String },
    Available {
        incidents: Vec<IncidentRecord>,
        snapshot: InfraSnapshot,
    },
}

impl IncidentPanel {
    /// Fetch incidents and snapshot; failures become `Unavailable`
    pub async fn collect(source: Option<&dyn IncidentSource>) -> Self {
        let Some(source) = source else {
            return IncidentPanel::Disabled;
        };

        match tokio::try_join!(source.fetch_incidents(), source.fetch_snapshot()) {
            Ok((incidents, snapshot)) => IncidentPanel::Available {
                incidents,
                snapshot,
            },
            Err(e) => {
                StructuredLogger::new("cloud_connector").log_connector_failed(source.provider(), &e);
                PipelineMetrics::new().inc_connector_errors(source.provider());
                IncidentPanel::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, IncidentPanel::Available { .. })
    }

    pub fn incidents(&self) -> &[IncidentRecord] {
        match self {
            IncidentPanel::Available { incidents, .. } => incidents,
            _ => &[],
        }
    }

    pub fn snapshot(&self) -> Option<&InfraSnapshot> {
        match self {
            IncidentPanel::Available { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

/// Build a connector from the environment.
///
/// Missing credentials disable the panel; any other error is reported
/// through an `Unavailable` panel by the caller.
pub fn connector_from_env() -> ConnectorResult<Option<Arc<dyn IncidentSource>>> {
    connector_from_lookup(|name| std::env::var(name).ok())
}

/// Pick the provider named by `CTD_CLOUD_PROVIDER`, otherwise the first of
/// GCP and Azure whose credentials are present
pub fn connector_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> ConnectorResult<Option<Arc<dyn IncidentSource>>> {
    let pinned = lookup(ENV_PROVIDER)
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty());

    match pinned.as_deref() {
        Some("gcp") => optional(gcp_source(&lookup)),
        Some("azure") => optional(azure_source(&lookup)),
        Some(other) => Err(ConnectorError::UnknownProvider(other.to_string())),
        None => match optional(gcp_source(&lookup))? {
            Some(source) => Ok(Some(source)),
            None => optional(azure_source(&lookup)),
        },
    }
}

fn gcp_source(lookup: impl Fn(&str) -> Option<String>) -> ConnectorResult<Arc<dyn IncidentSource>> {
    let connector = GcpMonitoringConnector::new(GcpConfig::from_lookup(lookup)?)?;
    Ok(Arc::new(connector))
}

fn azure_source(lookup: impl Fn(&str) -> Option<String>) -> ConnectorResult<Arc<dyn IncidentSource>> {
    let connector = AzureMonitorConnector::new(AzureConfig::from_lookup(lookup)?)?;
    Ok(Arc::new(connector))
}

fn optional(
    source: ConnectorResult<Arc<dyn IncidentSource>>,
) -> ConnectorResult<Option<Arc<dyn IncidentSource>>> {
    match source {
        Ok(source) => Ok(Some(source)),
        Err(ConnectorError::MissingCredentials(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
