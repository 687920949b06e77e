//! Experiment tracking backends.
//!
//! A [`TrackingBackend`] records runs: parameters, metrics, status and artifact
//! files. Two implementations exist, selected from the tracking URI:
//!
//! - `http(s)://`: [`MlflowClient`], speaking the MLflow REST API and writing
//!   artifacts through the repository named by the run's artifact URI
//! - `file://` or a plain path: [`FileTracking`], a local run store

pub mod artifacts;
pub mod file_store;
pub mod mlflow;
pub mod s3;

pub use artifacts::ArtifactRepository;
pub use file_store::FileTracking;
pub use mlflow::MlflowClient;

use crate::config::SweepConfig;
use crate::error::{ArtifactError, TrackingError};
use crate::sweep::trial::RunId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" | "SCHEDULED" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" => Some(RunStatus::Failed),
            "KILLED" => Some(RunStatus::Killed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an open run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub experiment_id: String,
    /// Root URI under which the run's artifacts live.
    pub artifact_uri: String,
}

/// Everything the backend holds about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub info: RunInfo,
    pub run_name: Option<String>,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    /// Latest value per metric key.
    pub metrics: BTreeMap<String, f64>,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
}

/// One file of an artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Path relative to the artifact directory, `/`-separated.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// A named artifact directory ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub name: String,
    pub files: Vec<ArtifactFile>,
}

impl ModelArtifact {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.push(ArtifactFile {
            path: path.to_string(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.bytes.len()).sum()
    }
}

/// An experiment-tracking backend.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Open a new run in the configured experiment.
    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo, TrackingError>;

    async fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<(), TrackingError>;

    async fn log_metric(
        &self,
        run_id: &RunId,
        key: &str,
        value: f64,
        step: i64,
    ) -> Result<(), TrackingError>;

    /// Upload an artifact directory under the run's artifact root.
    async fn log_artifact(&self, run: &RunInfo, artifact: &ModelArtifact)
    -> Result<(), ArtifactError>;

    /// Download `artifact_path` of a run into `dest_dir`, returning the local path.
    async fn download_artifact(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactError>;

    /// Close a run with a terminal status.
    async fn end_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), TrackingError>;

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, TrackingError>;
}

/// Build the backend named by `config.tracking.uri`.
pub fn connect_backend(config: &SweepConfig) -> Result<Arc<dyn TrackingBackend>, TrackingError> {
    let uri = config.tracking.uri.trim();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let client = MlflowClient::new(
            uri,
            &config.experiment_name,
            config.tracking.request_timeout_secs,
            config.artifact_store.clone(),
        )?;
        tracing::info!(uri, experiment = %config.experiment_name, "Using MLflow tracking server");
        return Ok(Arc::new(client));
    }
    if let Some(root) = local_path_from_uri(uri) {
        tracing::info!(root = %root.display(), "Using local run store");
        return Ok(Arc::new(FileTracking::new(root, &config.experiment_name)));
    }
    Err(TrackingError::UnsupportedUri {
        uri: uri.to_string(),
    })
}

/// Map `file:///x`, `file:x` or a bare path to a filesystem path.
pub(crate) fn local_path_from_uri(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if uri.is_empty() || uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
