//! Writes one trial into the tracking backend.

use crate::error::{SweepError, TrackingError};
use crate::sweep::trial::{RunId, TrialConfig, TrialResult};
use crate::tracking::{RunInfo, RunStatus, TrackingBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An open run owned by one trial.
///
/// Must be handed back to [`RunRecorder::record`] or [`RunRecorder::abandon`];
/// both close it. Dropping it while still open logs a warning.
#[derive(Debug)]
pub struct TrackingRun {
    info: RunInfo,
    trial: usize,
    closed: bool,
}

impl TrackingRun {
    pub fn run_id(&self) -> &RunId {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn trial(&self) -> usize {
        self.trial
    }
}

impl Drop for TrackingRun {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                run_id = %self.info.run_id,
                trial = self.trial,
                "Tracking run dropped without being closed"
            );
        }
    }
}

/// What happened to the model artifact upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ArtifactLogOutcome {
    Logged,
    Failed(String),
}

impl ArtifactLogOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self, ArtifactLogOutcome::Logged)
    }
}

/// Result of recording a trial whose parameters and metrics were stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub artifact: ArtifactLogOutcome,
    /// `false` when the run could not be marked finished.
    pub closed: bool,
}

/// Opens, fills and closes tracking runs.
pub struct RunRecorder {
    backend: Arc<dyn TrackingBackend>,
    artifact_name: String,
}

impl RunRecorder {
    pub fn new(backend: Arc<dyn TrackingBackend>, artifact_name: &str) -> Self {
        Self {
            backend,
            artifact_name: artifact_name.to_string(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn TrackingBackend> {
        &self.backend
    }

    /// Open the run for a trial, named `trial-<index>`.
    pub async fn open(&self, config: &TrialConfig) -> Result<TrackingRun, TrackingError> {
        let name = format!("trial-{}", config.index);
        let info = self.backend.start_run(Some(&name)).await?;
        tracing::debug!(run_id = %info.run_id, trial = config.index, "Opened tracking run");
        Ok(TrackingRun {
            info,
            trial: config.index,
            closed: false,
        })
    }

    /// Record parameters, metrics and the model artifact, then close the run.
    ///
    /// Parameter and metric failures are returned after the run is closed as
    /// `FAILED`. An artifact failure is reported in the outcome only.
    pub async fn record(
        &self,
        mut run: TrackingRun,
        result: &TrialResult,
    ) -> Result<RecordOutcome, SweepError> {
        let required = self.log_params_and_metrics(&run, result).await;
        let artifact = match &required {
            Ok(()) => self.log_artifact(&run, result).await,
            Err(_) => ArtifactLogOutcome::Failed("skipped: run not recorded".to_string()),
        };
        let status = if required.is_ok() {
            RunStatus::Finished
        } else {
            RunStatus::Failed
        };
        let closed = self.close(&mut run, status).await;
        required?;
        Ok(RecordOutcome { artifact, closed })
    }

    /// Close a run whose trial failed before producing a result.
    pub async fn abandon(&self, mut run: TrackingRun, error: &SweepError) {
        tracing::warn!(run_id = %run.info.run_id, trial = run.trial, error = %error, "Marking run failed");
        self.close(&mut run, RunStatus::Failed).await;
    }

    async fn log_params_and_metrics(
        &self,
        run: &TrackingRun,
        result: &TrialResult,
    ) -> Result<(), TrackingError> {
        let run_id = run.run_id();
        for (key, value) in result.config.params() {
            self.backend.log_param(run_id, key, &value.to_string()).await?;
        }
        self.backend
            .log_metric(run_id, "accuracy", result.accuracy, 0)
            .await?;
        self.backend.log_metric(run_id, "loss", result.loss, 0).await?;
        Ok(())
    }

    async fn log_artifact(&self, run: &TrackingRun, result: &TrialResult) -> ArtifactLogOutcome {
        let artifact = match result.model.to_artifact(&self.artifact_name, run.run_id()) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(run_id = %run.info.run_id, error = %e, "Failed to serialize model");
                return ArtifactLogOutcome::Failed(e.to_string());
            }
        };
        match self.backend.log_artifact(&run.info, &artifact).await {
            Ok(()) => {
                tracing::debug!(
                    run_id = %run.info.run_id,
                    files = artifact.files.len(),
                    bytes = artifact.total_bytes(),
                    "Logged model artifact"
                );
                ArtifactLogOutcome::Logged
            }
            Err(e) => {
                tracing::warn!(run_id = %run.info.run_id, error = %e, "Failed to log model artifact");
                ArtifactLogOutcome::Failed(e.to_string())
            }
        }
    }

    async fn close(&self, run: &mut TrackingRun, status: RunStatus) -> bool {
        run.closed = true;
        match self.backend.end_run(run.run_id(), status).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(run_id = %run.info.run_id, %status, error = %e, "Failed to close run");
                false
            }
        }
    }
}
