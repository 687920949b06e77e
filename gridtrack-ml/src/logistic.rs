//! Multinomial logistic regression fitted by full-batch gradient descent.
//!
//! The objective is the mean cross-entropy plus an L2 penalty
//! `||W||² / (2·C·n)`, the per-sample form of the `C`-weighted objective used
//! by liblinear-style solvers. Intercepts are not penalized. Features are
//! standardized with the training-set mean and deviation, and the scaling is
//! stored with the model.

use crate::data::DataSplit;
use gridtrack_core::error::{ArtifactError, TrainingError};
use gridtrack_core::sweep::{RunId, TrainedModel};
use gridtrack_core::tracking::ModelArtifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Solver settings for one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticParams {
    /// Inverse regularization strength.
    pub c: f64,
    pub max_iter: usize,
    pub step_size: f64,
    /// Stop once every gradient component is below this magnitude.
    pub tolerance: f64,
}

impl LogisticParams {
    fn validate(&self) -> Result<(), TrainingError> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(TrainingError::invalid_param("C", self.c, "must be positive"));
        }
        if self.max_iter == 0 {
            return Err(TrainingError::invalid_param("max_iter", self.max_iter, "must be at least 1"));
        }
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(TrainingError::invalid_param("step_size", self.step_size, "must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(TrainingError::invalid_param("tolerance", self.tolerance, "must be non-negative"));
        }
        Ok(())
    }
}

/// A fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_names: Vec<String>,
    pub class_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    /// `classes × features`, on standardized features.
    pub weights: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    pub c: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Training objective at the last iteration.
    pub objective: f64,
}

#[derive(Debug, Serialize)]
struct MlModelFile<'a> {
    artifact_path: &'a str,
    run_id: &'a str,
    model_uuid: String,
    utc_time_created: String,
    flavors: BTreeMap<&'a str, FlavorInfo<'a>>,
}

#[derive(Debug, Serialize)]
struct FlavorInfo<'a> {
    model_file: &'a str,
    loader: &'a str,
    classes: &'a [String],
    features: &'a [String],
}

const FLAVOR: &str = "gridtrack_logistic";

impl LogisticModel {
    /// Fit on `split.x_train` / `split.y_train`.
    pub fn fit(split: &DataSplit, params: &LogisticParams) -> Result<Self, TrainingError> {
        params.validate()?;
        let n = split.x_train.len();
        let d = split.n_features();
        let k = split.n_classes();
        if n == 0 || d == 0 || k < 2 {
            return Err(TrainingError::Evaluation {
                message: format!("cannot fit {k} classes on {n} samples with {d} features"),
            });
        }

        let (means, scales) = standardization(&split.x_train, d);
        let x: Vec<Vec<f64>> = split
            .x_train
            .iter()
            .map(|row| standardize(row, &means, &scales))
            .collect();

        let reg = 1.0 / (params.c * n as f64);
        // Lipschitz bound of the gradient on standardized features grows with the penalty.
        let step = params.step_size / (1.0 + reg);

        let mut weights = vec![vec![0.0; d]; k];
        let mut intercepts = vec![0.0; k];
        let mut objective = f64::NAN;
        let mut converged = false;
        let mut iterations = 0;

        for iter in 0..params.max_iter {
            iterations = iter + 1;
            let mut grad_w = vec![vec![0.0; d]; k];
            let mut grad_b = vec![0.0; k];
            let mut loss = 0.0;

            for (row, &label) in x.iter().zip(&split.y_train) {
                let probs = softmax(&logits(row, &weights, &intercepts));
                loss -= probs[label].max(1e-300).ln();
                for class in 0..k {
                    let err = probs[class] - if class == label { 1.0 } else { 0.0 };
                    grad_b[class] += err;
                    for (g, xj) in grad_w[class].iter_mut().zip(row) {
                        *g += err * xj;
                    }
                }
            }

            let penalty: f64 = weights
                .iter()
                .flat_map(|w| w.iter())
                .map(|w| w * w)
                .sum::<f64>()
                * reg
                / 2.0;
            objective = loss / n as f64 + penalty;
            if !objective.is_finite() {
                return Err(TrainingError::Diverged {
                    iterations,
                    reason: format!("objective is {objective}"),
                });
            }

            let mut max_grad: f64 = 0.0;
            for class in 0..k {
                grad_b[class] /= n as f64;
                max_grad = max_grad.max(grad_b[class].abs());
                for (g, w) in grad_w[class].iter_mut().zip(&weights[class]) {
                    *g = *g / n as f64 + reg * w;
                    max_grad = max_grad.max(g.abs());
                }
            }
            if max_grad < params.tolerance {
                converged = true;
                break;
            }

            for class in 0..k {
                intercepts[class] -= step * grad_b[class];
                for (w, g) in weights[class].iter_mut().zip(&grad_w[class]) {
                    *w -= step * g;
                }
            }
        }

        tracing::debug!(c = params.c, iterations, converged, objective, "Fitted logistic regression");
        Ok(Self {
            feature_names: split.feature_names.clone(),
            class_names: split.class_names.clone(),
            means,
            scales,
            weights,
            intercepts,
            c: params.c,
            iterations,
            converged,
            objective,
        })
    }

    pub fn predict_proba(&self, sample: &[f64]) -> Vec<f64> {
        let row = standardize(sample, &self.means, &self.scales);
        softmax(&logits(&row, &self.weights, &self.intercepts))
    }

    pub fn predict(&self, sample: &[f64]) -> usize {
        argmax(&self.predict_proba(sample))
    }
}

impl TrainedModel for LogisticModel {
    fn flavor(&self) -> &str {
        FLAVOR
    }

    fn to_artifact(&self, name: &str, run_id: &RunId) -> Result<ModelArtifact, ArtifactError> {
        let model_json = serde_json::to_vec_pretty(self).map_err(|e| ArtifactError::Serialize {
            message: e.to_string(),
        })?;
        let mut flavors = BTreeMap::new();
        flavors.insert(
            FLAVOR,
            FlavorInfo {
                model_file: "model.json",
                loader: "gridtrack_ml::LogisticModel",
                classes: &self.class_names,
                features: &self.feature_names,
            },
        );
        let meta = MlModelFile {
            artifact_path: name,
            run_id: run_id.as_str(),
            model_uuid: uuid::Uuid::new_v4().simple().to_string(),
            utc_time_created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            flavors,
        };
        let mlmodel = serde_yaml::to_string(&meta).map_err(|e| ArtifactError::Serialize {
            message: e.to_string(),
        })?;
        Ok(ModelArtifact::new(name)
            .with_file("MLmodel", mlmodel)
            .with_file("model.json", model_json))
    }
}

fn standardization(rows: &[Vec<f64>], d: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let mut means = vec![0.0; d];
    for row in rows {
        for (m, x) in means.iter_mut().zip(row) {
            *m += x / n;
        }
    }
    let mut scales = vec![0.0; d];
    for row in rows {
        for ((s, x), m) in scales.iter_mut().zip(row).zip(&means) {
            *s += (x - m).powi(2) / n;
        }
    }
    for s in &mut scales {
        *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
    }
    (means, scales)
}

fn standardize(row: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means)
        .zip(scales)
        .map(|((x, m), s)| (x - m) / s)
        .collect()
}

fn logits(row: &[f64], weights: &[Vec<f64>], intercepts: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .zip(intercepts)
        .map(|(w, b)| b + w.iter().zip(row).map(|(wj, xj)| wj * xj).sum::<f64>())
        .collect()
}

fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.iter().map(|e| e / sum).collect()
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
