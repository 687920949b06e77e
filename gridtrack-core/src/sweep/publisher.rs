//! Best-effort export of trial scores to the metrics gateway.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{GaugeRegistry, MetricsGateway};
use crate::sweep::trial::TrialResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What happened to a trial's metrics push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PublishOutcome {
    Pushed,
    Failed(String),
    /// No gateway configured.
    Disabled,
}

/// Pushes accuracy and loss gauges for each trial.
///
/// Every call builds its own registry, so concurrent trials never share
/// gauge state.
pub struct MetricsPublisher {
    gateway: Option<Arc<dyn MetricsGateway>>,
    job: String,
    accuracy_metric: String,
    loss_metric: String,
}

impl MetricsPublisher {
    pub fn new(gateway: Arc<dyn MetricsGateway>, config: &GatewayConfig) -> Self {
        Self {
            gateway: Some(gateway),
            job: config.job.clone(),
            accuracy_metric: config.accuracy_metric.clone(),
            loss_metric: config.loss_metric.clone(),
        }
    }

    /// A publisher that never pushes.
    pub fn disabled() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            gateway: None,
            job: defaults.job,
            accuracy_metric: defaults.accuracy_metric,
            loss_metric: defaults.loss_metric,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    /// Gauges for one result.
    pub fn registry_for(&self, result: &TrialResult) -> Result<GaugeRegistry, GatewayError> {
        let run_id = result.run_id.as_str();
        let mut registry = GaugeRegistry::new();
        registry
            .gauge(&self.accuracy_metric, "Accuracy metric", &["run_id"])?
            .set(&[run_id], result.accuracy)?;
        registry
            .gauge(&self.loss_metric, "Loss metric", &["run_id"])?
            .set(&[run_id], result.loss)?;
        Ok(registry)
    }

    pub async fn publish(&self, result: &TrialResult) -> PublishOutcome {
        let Some(gateway) = &self.gateway else {
            return PublishOutcome::Disabled;
        };
        let pushed = match self.registry_for(result) {
            Ok(registry) => gateway.push(&self.job, &registry).await,
            Err(e) => Err(e),
        };
        match pushed {
            Ok(()) => {
                tracing::info!(run_id = %result.run_id, gateway = gateway.endpoint(), "Metrics pushed to gateway");
                PublishOutcome::Pushed
            }
            Err(e) => {
                tracing::warn!(run_id = %result.run_id, gateway = gateway.endpoint(), error = %e, "Failed to push metrics");
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}
