//! Live threat dashboard
//!
//! Re-runs the detection pipeline on a fixed interval and serves the latest
//! results as an auto-refreshing HTML page, a JSON API, and the usual
//! health and Prometheus endpoints.

pub mod api;
pub mod refresher;
pub mod state;
pub mod view;

pub use refresher::Refresher;
pub use state::{AppState, DashboardSnapshot, ResultsResponse};
