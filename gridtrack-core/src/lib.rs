//! # gridtrack core
//!
//! Hyperparameter grid sweeps with experiment tracking.
//! Provides the sweep engine (planner, recorder, publisher, best-run
//! selection, artifact fetching), tracking backends (MLflow REST, local run
//! store), the Pushgateway client, configuration and error types.

pub mod config;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod sweep;
pub mod tracking;

// Re-export commonly used types at the crate root.
pub use config::{FailurePolicy, SweepConfig, load_config};
pub use error::{
    ArtifactError, ConfigError, DatasetError, GatewayError, Result, SweepError, TrackingError,
    TrainingError,
};
pub use gateway::{GaugeRegistry, MetricsGateway, PushGateway};
pub use sweep::{
    BestRunSelector, RunId, SweepDriver, SweepEvent, SweepObserver, SweepPlanner, SweepSummary,
    TrainedModel, TrialConfig, TrialResult, TrialRunner,
};
pub use tracking::{ModelArtifact, RunRecord, RunStatus, TrackingBackend, connect_backend};
