//! Error types for gridtrack.
//!
//! Uses `thiserror` for the public error taxonomy. Training failures and
//! failures to persist a run's parameters or metrics are fatal for the trial;
//! artifact, gateway and download failures are carried as outcome values by
//! the sweep components and only appear here as their inner reason.

use std::path::PathBuf;

/// Result type for sweep operations.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Top-level error type for a sweep.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trial {index} aborted: {source}")]
    TrialAborted {
        index: usize,
        #[source]
        source: Box<SweepError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the experiment-tracking backend.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("Tracking server returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {message}")]
    Response { endpoint: String, message: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Unsupported tracking URI: {uri}")]
    UnsupportedUri { uri: String },

    #[error("Run store error at {path}: {message}")]
    Store { path: PathBuf, message: String },
}

/// Errors from logging or retrieving run artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to serialize model artifact: {message}")]
    Serialize { message: String },

    #[error("Upload of {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("Download of {path} failed: {message}")]
    Download { path: String, message: String },

    #[error("Artifact {path} not found for run {run_id}")]
    NotFound { run_id: String, path: String },

    #[error("Unsupported artifact URI: {uri}")]
    UnsupportedUri { uri: String },

    #[error("Artifact listing failed: {0}")]
    Listing(#[from] TrackingError),

    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from pushing metrics to the monitoring gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Push to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Gateway {url} rejected push with status {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid metric name: {name}")]
    InvalidMetricName { name: String },

    #[error("Metric {metric} expects {expected} label values, got {got}")]
    LabelMismatch {
        metric: String,
        expected: usize,
        got: usize,
    },

    #[error("Failed to build gateway client: {message}")]
    Client { message: String },
}

/// Errors raised while training or evaluating one trial's model.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Missing hyperparameter: {name}")]
    MissingParam { name: String },

    #[error("Invalid hyperparameter {name}={value}: {reason}")]
    InvalidParam {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Training diverged after {iterations} iterations: {reason}")]
    Diverged { iterations: usize, reason: String },

    #[error("Evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("Training task panicked or was cancelled: {message}")]
    Task { message: String },
}

/// Errors from loading or splitting the dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Label column '{column}' not found")]
    MissingLabelColumn { column: String },

    #[error("Dataset too small: {message}")]
    TooSmall { message: String },

    #[error("Invalid dataset parameter: {message}")]
    InvalidParameter { message: String },
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid grid: {message}")]
    InvalidGrid { message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl SweepError {
    /// Whether this error came out of the training step.
    pub fn is_training(&self) -> bool {
        match self {
            Self::Training(_) => true,
            Self::TrialAborted { source, .. } => source.is_training(),
            _ => false,
        }
    }
}

impl TrackingError {
    pub fn request(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Request {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    pub fn response(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Response {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Store {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl TrainingError {
    pub fn invalid_param(
        name: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
