//! Cloud threat detection library
//!
//! Simulates or ingests cloud infrastructure metrics, flags anomalous time
//! steps with an Isolation Forest and renders the results. Shared by the
//! `ctd` CLI and the threat dashboard.

pub mod cloud;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod health;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod scorer;
pub mod simulator;

pub use cloud::{IncidentPanel, IncidentSource};
pub use config::DetectorConfig;
pub use error::{ConnectorError, PipelineError};
pub use pipeline::{AnalysisResult, Pipeline, ResultRow};
pub use report::Reporter;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
