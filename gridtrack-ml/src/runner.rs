//! The default trial runner: logistic regression on a fixed split.

use crate::data::DataSplit;
use crate::logistic::{LogisticModel, LogisticParams, argmax};
use crate::metrics::{accuracy, log_loss};
use gridtrack_core::config::ModelConfig;
use gridtrack_core::error::TrainingError;
use gridtrack_core::sweep::{RunId, TrialConfig, TrialResult, TrialRunner};
use std::sync::Arc;

/// Grid parameter holding the inverse regularization strength.
pub const LEARNING_RATE_PARAM: &str = "learning_rate";
/// Grid parameter bounding the solver iterations.
pub const EPOCHS_PARAM: &str = "epochs";

/// Trains a [`LogisticModel`] per trial and scores it on the held-out split.
///
/// `learning_rate` is passed to the solver as `C` and `epochs` as the
/// iteration cap, so the familiar grid names keep their meaning for
/// scikit-learn style configurations.
pub struct LogisticTrialRunner {
    split: Arc<DataSplit>,
    step_size: f64,
    tolerance: f64,
}

impl LogisticTrialRunner {
    pub fn new(split: Arc<DataSplit>, model: &ModelConfig) -> Self {
        Self {
            split,
            step_size: model.step_size,
            tolerance: model.tolerance,
        }
    }

    pub fn split(&self) -> &DataSplit {
        &self.split
    }

    fn params(&self, config: &TrialConfig) -> Result<LogisticParams, TrainingError> {
        let c = config.get_f64(LEARNING_RATE_PARAM)?;
        if !(c.is_finite() && c > 0.0) {
            return Err(TrainingError::invalid_param(
                LEARNING_RATE_PARAM,
                c,
                "must be a positive number",
            ));
        }
        let max_iter = config.get_usize(EPOCHS_PARAM)?;
        if max_iter == 0 {
            return Err(TrainingError::invalid_param(EPOCHS_PARAM, max_iter, "must be at least 1"));
        }
        Ok(LogisticParams {
            c,
            max_iter,
            step_size: self.step_size,
            tolerance: self.tolerance,
        })
    }
}

impl TrialRunner for LogisticTrialRunner {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn run(&self, config: &TrialConfig, run_id: &RunId) -> Result<TrialResult, TrainingError> {
        let params = self.params(config)?;
        let model = LogisticModel::fit(&self.split, &params)?;

        let probabilities: Vec<Vec<f64>> = self
            .split
            .x_test
            .iter()
            .map(|x| model.predict_proba(x))
            .collect();
        let predictions: Vec<usize> = probabilities.iter().map(|p| argmax(p)).collect();
        let acc = accuracy(&self.split.y_test, &predictions);
        let loss = log_loss(&self.split.y_test, &probabilities);
        if !loss.is_finite() {
            return Err(TrainingError::Evaluation {
                message: format!("held-out loss is {loss}"),
            });
        }

        tracing::debug!(
            trial = config.index,
            run_id = %run_id,
            accuracy = acc,
            loss,
            iterations = model.iterations,
            converged = model.converged,
            "Evaluated logistic regression"
        );
        Ok(TrialResult {
            config: config.clone(),
            run_id: run_id.clone(),
            accuracy: acc,
            loss,
            model: Arc::new(model),
        })
    }
}
