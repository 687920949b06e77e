//! Configuration system for gridtrack.
//!
//! Uses `figment` for layered configuration: defaults -> config files ->
//! environment -> CLI args. Configuration is loaded from
//! `~/.config/gridtrack/config.toml`, `.gridtrack/config.toml` in the workspace
//! directory and an optional explicit file. The resulting [`SweepConfig`] is
//! handed to the tracking, gateway and sweep constructors; nothing here
//! touches the process environment.

use crate::error::ConfigError;
use crate::sweep::planner::{GridDimension, HyperparamGrid, ParamValue};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Experiment the runs are grouped under in the tracking backend.
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub artifact_store: ArtifactStoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub grid: HyperparamGrid,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            experiment_name: default_experiment_name(),
            tracking: TrackingConfig::default(),
            artifact_store: ArtifactStoreConfig::default(),
            gateway: GatewayConfig::default(),
            grid: default_grid(),
            dataset: DatasetConfig::default(),
            model: ModelConfig::default(),
            execution: ExecutionConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_experiment_name() -> String {
    "iris-experiment".to_string()
}

fn default_grid() -> HyperparamGrid {
    HyperparamGrid::new(vec![
        GridDimension::new(
            "learning_rate",
            vec![
                ParamValue::Float(0.01),
                ParamValue::Float(0.1),
                ParamValue::Float(1.0),
            ],
        ),
        GridDimension::new(
            "epochs",
            vec![
                ParamValue::Int(50),
                ParamValue::Int(100),
                ParamValue::Int(200),
            ],
        ),
    ])
}

/// Tracking backend location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// `http(s)://` for an MLflow server, `file://` or a path for a local run store.
    #[serde(default = "default_tracking_uri")]
    pub uri: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: default_tracking_uri(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Object store backing the tracking server's artifact root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStoreConfig {
    /// S3-compatible endpoint (MinIO). When cleared, the regional AWS endpoint
    /// is used, addressed path-style.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Artifact root used when the tracking server does not report one.
    #[serde(default = "default_artifact_root")]
    pub default_root: String,
    /// Name of the model artifact directory inside each run.
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            endpoint_url: Some("http://localhost:9000".to_string()),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
            region: default_region(),
            default_root: default_artifact_root(),
            artifact_name: default_artifact_name(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_artifact_root() -> String {
    "s3://mlflow-artifacts".to_string()
}

fn default_artifact_name() -> String {
    "model".to_string()
}

/// Prometheus Pushgateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_job")]
    pub job: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_accuracy_metric")]
    pub accuracy_metric: String,
    #[serde(default = "default_loss_metric")]
    pub loss_metric: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_gateway_url(),
            job: default_job(),
            timeout_secs: default_gateway_timeout(),
            accuracy_metric: default_accuracy_metric(),
            loss_metric: default_loss_metric(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_gateway_url() -> String {
    "http://localhost:9091".to_string()
}

fn default_job() -> String {
    "iris_training".to_string()
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_accuracy_metric() -> String {
    "mlflow_accuracy".to_string()
}

fn default_loss_metric() -> String {
    "mlflow_loss".to_string()
}

/// Where the fixed train/test split comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub source: DatasetSource,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            source: DatasetSource::default(),
            test_fraction: default_test_fraction(),
            seed: default_seed(),
        }
    }
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

/// Dataset source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    /// Numeric feature columns plus one label column.
    Csv {
        path: PathBuf,
        #[serde(default = "default_label_column")]
        label_column: String,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    /// Seeded Gaussian clusters, one per class.
    Blobs {
        #[serde(default = "default_samples")]
        samples: usize,
        #[serde(default = "default_features")]
        features: usize,
        #[serde(default = "default_classes")]
        classes: usize,
        #[serde(default = "default_spread")]
        spread: f64,
    },
}

impl Default for DatasetSource {
    fn default() -> Self {
        Self::Blobs {
            samples: default_samples(),
            features: default_features(),
            classes: default_classes(),
            spread: default_spread(),
        }
    }
}

fn default_label_column() -> String {
    "label".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_samples() -> usize {
    150
}

fn default_features() -> usize {
    4
}

fn default_classes() -> usize {
    3
}

fn default_spread() -> f64 {
    1.0
}

/// Optimizer settings for the bundled logistic regression runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_step_size() -> f64 {
    0.5
}

fn default_tolerance() -> f64 {
    1e-4
}

/// What happens to the sweep when a trial fails fatally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop starting new trials, drain in-flight ones, return the error.
    #[default]
    Abort,
    /// Record the failure in the summary and move on.
    Continue,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// Trial scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Trials in flight at once; `1` runs them strictly in planner order.
    #[serde(default = "default_parallel")]
    pub max_parallel_trials: usize,
    #[serde(default)]
    pub on_trial_failure: FailurePolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_trials: default_parallel(),
            on_trial_failure: FailurePolicy::Abort,
        }
    }
}

fn default_parallel() -> usize {
    1
}

/// Local outputs of a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination for the best run's artifact.
    #[serde(default = "default_best_model_dir")]
    pub best_model_dir: PathBuf,
    /// JSON summary written when the sweep finishes.
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            best_model_dir: default_best_model_dir(),
            summary_path: Some(PathBuf::from("best_model/sweep_summary.json")),
        }
    }
}

fn default_best_model_dir() -> PathBuf {
    PathBuf::from("best_model")
}

impl SweepConfig {
    /// Check the values figment cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.execution.max_parallel_trials == 0 {
            return Err(ConfigError::InvalidValue {
                field: "execution.max_parallel_trials".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(self.dataset.test_fraction > 0.0 && self.dataset.test_fraction < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "dataset.test_fraction".into(),
                message: format!("{} is not in (0, 1)", self.dataset.test_fraction),
            });
        }
        if self.artifact_store.artifact_name.is_empty()
            || self.artifact_store.artifact_name.contains(['/', '\\'])
        {
            return Err(ConfigError::InvalidValue {
                field: "artifact_store.artifact_name".into(),
                message: "must be a single non-empty path component".into(),
            });
        }
        if self.gateway.enabled && self.gateway.job.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "gateway.job".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Environment names used by MLflow, boto and the Prometheus client libraries.
fn well_known_env() -> Env {
    Env::raw().filter_map(|key| {
        let mapped = match key.as_str().to_ascii_uppercase().as_str() {
            "MLFLOW_TRACKING_URI" => "tracking.uri",
            "MLFLOW_EXPERIMENT_NAME" => "experiment_name",
            "MLFLOW_S3_ENDPOINT_URL" => "artifact_store.endpoint_url",
            "MLFLOW_ARTIFACT_ROOT" => "artifact_store.default_root",
            "AWS_ACCESS_KEY_ID" => "artifact_store.access_key_id",
            "AWS_SECRET_ACCESS_KEY" => "artifact_store.secret_access_key",
            "AWS_DEFAULT_REGION" => "artifact_store.region",
            "PUSHGATEWAY_URL" => "gateway.url",
            _ => return None,
        };
        Some(mapped.into())
    })
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables prefixed with `GRIDTRACK_` (`GRIDTRACK_GATEWAY__JOB`)
/// 2. Well-known tool variables (`MLFLOW_TRACKING_URI`, `AWS_ACCESS_KEY_ID`, ...)
/// 3. Explicit config file
/// 4. Workspace-local config (`.gridtrack/config.toml`)
/// 5. User config (`~/.config/gridtrack/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<SweepConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "gridtrack", "gridtrack") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".gridtrack").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file_exact(path));
    }

    figment = figment
        .merge(well_known_env())
        .merge(Env::prefixed("GRIDTRACK_").split("__"));

    let config: SweepConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
