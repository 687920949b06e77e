//! Prometheus Pushgateway client.

use super::MetricsGateway;
use super::registry::GaugeRegistry;
use crate::error::GatewayError;
use async_trait::async_trait;
use std::time::Duration;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Pushes registries with `PUT /metrics/job/<job>`, replacing the job's group.
#[derive(Debug, Clone)]
pub struct PushGateway {
    http: reqwest::Client,
    base_url: String,
}

impl PushGateway {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.min(5)))
            .build()
            .map_err(|e| GatewayError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn job_url(&self, job: &str) -> String {
        format!("{}/metrics/job/{}", self.base_url, urlencoding::encode(job))
    }
}

#[async_trait]
impl MetricsGateway for PushGateway {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn push(&self, job: &str, registry: &GaugeRegistry) -> Result<(), GatewayError> {
        let url = self.job_url(job);
        let response = self
            .http
            .put(&url)
            .header("content-type", CONTENT_TYPE)
            .body(registry.render())
            .send()
            .await
            .map_err(|e| GatewayError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                url,
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(url = %url, samples = registry.sample_count(), "Pushed metrics");
        Ok(())
    }
}
