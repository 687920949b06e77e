//! Trial inputs and outputs, and the seam to the model being swept.

use crate::error::{ArtifactError, TrainingError};
use crate::sweep::planner::ParamValue;
use crate::tracking::ModelArtifact;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier the tracking backend assigned to a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hyperparameters of one trial, in grid declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Position in planner order.
    pub index: usize,
    params: Vec<(String, ParamValue)>,
}

impl TrialConfig {
    pub fn new(index: usize, params: Vec<(String, ParamValue)>) -> Self {
        Self { index, params }
    }

    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Read a required numeric hyperparameter.
    pub fn get_f64(&self, name: &str) -> Result<f64, TrainingError> {
        let value = self.get(name).ok_or_else(|| TrainingError::MissingParam {
            name: name.to_string(),
        })?;
        value
            .as_f64()
            .ok_or_else(|| TrainingError::invalid_param(name, value, "expected a number"))
    }

    /// Read a required non-negative integer hyperparameter.
    pub fn get_usize(&self, name: &str) -> Result<usize, TrainingError> {
        let value = self.get(name).ok_or_else(|| TrainingError::MissingParam {
            name: name.to_string(),
        })?;
        value
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| TrainingError::invalid_param(name, value, "expected a non-negative integer"))
    }

    /// `name=value, name=value` in declaration order.
    pub fn label(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A model that can be serialized into a run artifact.
pub trait TrainedModel: Send + Sync + fmt::Debug {
    /// Model family, recorded in artifact metadata.
    fn flavor(&self) -> &str;

    /// Serialize into the artifact directory `name`.
    fn to_artifact(&self, name: &str, run_id: &RunId) -> Result<ModelArtifact, ArtifactError>;
}

/// Shared handle to a trained model.
pub type ModelHandle = Arc<dyn TrainedModel>;

/// Evaluated outcome of one trial.
#[derive(Debug, Clone)]
pub struct TrialResult {
    pub config: TrialConfig,
    pub run_id: RunId,
    /// Fraction of held-out samples classified correctly, in `[0, 1]`.
    pub accuracy: f64,
    /// Cross-entropy on the same held-out samples.
    pub loss: f64,
    pub model: ModelHandle,
}

impl TrialResult {
    /// Reject scores that must never reach best-run selection.
    pub fn check_scores(&self) -> Result<(), TrainingError> {
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(TrainingError::Evaluation {
                message: format!("accuracy {} outside [0, 1]", self.accuracy),
            });
        }
        if !self.loss.is_finite() || self.loss < 0.0 {
            return Err(TrainingError::Evaluation {
                message: format!("loss {} is not a non-negative number", self.loss),
            });
        }
        Ok(())
    }
}

/// Trains and evaluates one configuration against a fixed train/test split.
///
/// Called on the blocking thread pool; implementations may be CPU bound.
pub trait TrialRunner: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, config: &TrialConfig, run_id: &RunId) -> Result<TrialResult, TrainingError>;
}
