//! Error types for the detection pipeline and the cloud connector

use thiserror::Error;

/// Failures that abort a single pipeline run.
///
/// All of these are local and recoverable: the caller may retry the run
/// with different (e.g. simulated) input.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Insufficient data: required {required} samples, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),
}

impl PipelineError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the input data rather than the environment
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::Malformed(_) | Self::Csv(_) | Self::Json(_)
        )
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures raised by a cloud monitoring connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("Authentication rejected ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Monitoring API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode monitoring API response: {0}")]
    Decode(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Unknown cloud provider '{0}' (expected gcp or azure)")]
    UnknownProvider(String),
}

impl ConnectorError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::MissingCredentials(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_display() {
        let error = PipelineError::InsufficientData {
            required: 2,
            got: 1,
        };
        assert_eq!(
            error.to_string(),
            "Insufficient data: required 2 samples, got 1"
        );
    }

    #[test]
    fn test_invalid_parameter_display() {
        let error = PipelineError::invalid("contamination", "must be in (0, 0.5]");
        assert_eq!(
            error.to_string(),
            "Invalid parameter: contamination - must be in (0, 0.5]"
        );
    }

    #[test]
    fn test_data_error_classification() {
        assert!(PipelineError::Malformed("bad row".into()).is_data_error());
        assert!(PipelineError::InsufficientData { required: 2, got: 0 }.is_data_error());
        assert!(!PipelineError::invalid("x", "y").is_data_error());
    }

    #[test]
    fn test_auth_failure_classification() {
        let auth = ConnectorError::Authentication {
            status: 401,
            message: "token expired".into(),
        };
        assert!(auth.is_auth_failure());
        assert!(ConnectorError::MissingCredentials("GCP_ACCESS_TOKEN".into()).is_auth_failure());
        assert!(!ConnectorError::Decode("eof".into()).is_auth_failure());
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineError>();
        assert_send_sync::<ConnectorError>();
    }
}
