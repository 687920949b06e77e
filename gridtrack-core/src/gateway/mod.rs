//! Metrics gateway: best-effort export of per-trial gauges.

pub mod pushgateway;
pub mod registry;

pub use pushgateway::PushGateway;
pub use registry::{GaugeFamily, GaugeRegistry};

use crate::error::GatewayError;
use async_trait::async_trait;

/// A push-based metrics sink.
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Gateway address for logs.
    fn endpoint(&self) -> &str;

    /// Push a registry under `job`.
    async fn push(&self, job: &str, registry: &GaugeRegistry) -> Result<(), GatewayError>;
}
