//! MLflow tracking server client (REST API 2.0).

use super::artifacts::{ArtifactRepository, safe_join};
use super::{ModelArtifact, RunInfo, RunRecord, RunStatus, TrackingBackend, now_ms};
use crate::config::ArtifactStoreConfig;
use crate::error::{ArtifactError, TrackingError};
use crate::sweep::trial::RunId;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;

const API_PREFIX: &str = "api/2.0/mlflow";

/// Maximum directory depth followed when listing artifacts.
const MAX_LIST_DEPTH: usize = 16;

/// HTTP client for an MLflow tracking server.
pub struct MlflowClient {
    http: reqwest::Client,
    base_url: String,
    experiment_name: String,
    experiment_id: OnceCell<String>,
    store: ArtifactStoreConfig,
}

impl MlflowClient {
    pub fn new(
        base_url: &str,
        experiment_name: &str,
        timeout_secs: u64,
        store: ArtifactStoreConfig,
    ) -> Result<Self, TrackingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
            .user_agent(concat!("gridtrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackingError::request("client", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            experiment_name: experiment_name.to_string(),
            experiment_id: OnceCell::new(),
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{API_PREFIX}/{endpoint}", self.base_url)
    }

    async fn read_response(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<Value, TrackingError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TrackingError::request(endpoint, e))?;
        if !status.is_success() {
            return Err(TrackingError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&body)
            .map_err(|e| TrackingError::response(endpoint, format!("invalid JSON: {e}")))
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, TrackingError> {
        let response = self
            .http
            .post(self.url(endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| TrackingError::request(endpoint, e))?;
        Self::read_response(endpoint, response).await
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, TrackingError> {
        let response = self
            .http
            .get(self.url(endpoint))
            .query(query)
            .send()
            .await
            .map_err(|e| TrackingError::request(endpoint, e))?;
        Self::read_response(endpoint, response).await
    }

    /// Resolve (or create) the experiment once per client.
    pub async fn experiment_id(&self) -> Result<&str, TrackingError> {
        let id = self
            .experiment_id
            .get_or_try_init(|| self.resolve_experiment())
            .await?;
        Ok(id.as_str())
    }

    async fn resolve_experiment(&self) -> Result<String, TrackingError> {
        let lookup = self
            .get(
                "experiments/get-by-name",
                &[("experiment_name", self.experiment_name.as_str())],
            )
            .await;
        match lookup {
            Ok(body) => string_field(&body["experiment"]["experiment_id"]).ok_or_else(|| {
                TrackingError::response("experiments/get-by-name", "missing experiment_id")
            }),
            Err(TrackingError::Status { status: 404, .. }) => {
                tracing::info!(experiment = %self.experiment_name, "Creating MLflow experiment");
                let body = self
                    .post("experiments/create", json!({ "name": self.experiment_name }))
                    .await?;
                string_field(&body["experiment_id"]).ok_or_else(|| {
                    TrackingError::response("experiments/create", "missing experiment_id")
                })
            }
            Err(e) => Err(e),
        }
    }

    fn repository(&self, artifact_uri: &str) -> Result<ArtifactRepository, ArtifactError> {
        ArtifactRepository::resolve(artifact_uri, &self.http, &self.base_url, &self.store)
    }

    /// List files under `path`, descending into directories.
    async fn list_files(
        &self,
        run_id: &RunId,
        path: &str,
    ) -> Result<(String, Vec<String>), TrackingError> {
        let mut root_uri = String::new();
        let mut files = Vec::new();
        let mut pending = vec![(path.to_string(), 0usize)];
        while let Some((dir, depth)) = pending.pop() {
            let body = self
                .get(
                    "artifacts/list",
                    &[("run_id", run_id.as_str()), ("path", dir.as_str())],
                )
                .await?;
            if root_uri.is_empty() {
                root_uri = string_field(&body["root_uri"]).unwrap_or_default();
            }
            for entry in body["files"].as_array().into_iter().flatten() {
                let Some(entry_path) = string_field(&entry["path"]) else {
                    continue;
                };
                if entry["is_dir"].as_bool().unwrap_or(false) {
                    if depth + 1 < MAX_LIST_DEPTH {
                        pending.push((entry_path, depth + 1));
                    }
                } else {
                    files.push(entry_path);
                }
            }
        }
        files.sort();
        Ok((root_uri, files))
    }
}

#[async_trait]
impl TrackingBackend for MlflowClient {
    fn name(&self) -> &str {
        "mlflow"
    }

    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo, TrackingError> {
        let experiment_id = self.experiment_id().await?.to_string();
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": now_ms(),
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
            body["tags"] = json!([{ "key": "mlflow.runName", "value": name }]);
        }
        let response = self.post("runs/create", body).await?;
        let info = &response["run"]["info"];
        let run_id = string_field(&info["run_id"])
            .or_else(|| string_field(&info["run_uuid"]))
            .ok_or_else(|| TrackingError::response("runs/create", "missing run_id"))?;
        let artifact_uri = string_field(&info["artifact_uri"])
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{}/{experiment_id}/{run_id}/artifacts",
                    self.store.default_root.trim_end_matches('/')
                )
            });
        tracing::debug!(run_id = %run_id, artifact_uri = %artifact_uri, "MLflow run created");
        Ok(RunInfo {
            run_id: RunId::new(run_id),
            experiment_id,
            artifact_uri,
        })
    }

    async fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<(), TrackingError> {
        self.post(
            "runs/log-parameter",
            json!({ "run_id": run_id.as_str(), "key": key, "value": value }),
        )
        .await
        .map(|_| ())
    }

    async fn log_metric(
        &self,
        run_id: &RunId,
        key: &str,
        value: f64,
        step: i64,
    ) -> Result<(), TrackingError> {
        self.post(
            "runs/log-metric",
            json!({
                "run_id": run_id.as_str(),
                "key": key,
                "value": value,
                "timestamp": now_ms(),
                "step": step,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn log_artifact(
        &self,
        run: &RunInfo,
        artifact: &ModelArtifact,
    ) -> Result<(), ArtifactError> {
        let repo = self.repository(&run.artifact_uri)?;
        tracing::debug!(
            run_id = %run.run_id,
            repository = repo.kind(),
            files = artifact.files.len(),
            "Uploading artifact"
        );
        for file in &artifact.files {
            repo.put(&format!("{}/{}", artifact.name, file.path), file.bytes.clone())
                .await?;
        }
        Ok(())
    }

    async fn download_artifact(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactError> {
        let (mut root_uri, files) = self.list_files(run_id, artifact_path).await?;
        if root_uri.is_empty() {
            root_uri = self.get_run(run_id).await?.info.artifact_uri;
        }
        let repo = self.repository(&root_uri)?;

        // An empty listing means either a single file or nothing at all.
        let files = if files.is_empty() {
            vec![artifact_path.to_string()]
        } else {
            files
        };

        for file in &files {
            let bytes = match repo.get(file).await {
                Ok(bytes) => bytes,
                Err(ArtifactError::Download { .. }) if file == artifact_path => {
                    return Err(ArtifactError::NotFound {
                        run_id: run_id.to_string(),
                        path: artifact_path.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };
            let out = safe_join(dest_dir, file)?;
            if let Some(parent) = out.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&out, bytes).await?;
        }
        safe_join(dest_dir, artifact_path)
    }

    async fn end_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), TrackingError> {
        self.post(
            "runs/update",
            json!({
                "run_id": run_id.as_str(),
                "status": status.as_str(),
                "end_time": now_ms(),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, TrackingError> {
        let body = match self.get("runs/get", &[("run_id", run_id.as_str())]).await {
            Err(TrackingError::Status { status: 404, .. }) => {
                return Err(TrackingError::RunNotFound {
                    run_id: run_id.to_string(),
                });
            }
            other => other?,
        };
        parse_run(&body["run"])
            .ok_or_else(|| TrackingError::response("runs/get", "malformed run payload"))
    }
}

/// Read a string or number field as a string.
fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// MLflow may encode int64 fields either as numbers or as strings.
fn int_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_run(run: &Value) -> Option<RunRecord> {
    let info = &run["info"];
    let data = &run["data"];

    let run_id = string_field(&info["run_id"]).or_else(|| string_field(&info["run_uuid"]))?;
    let status = info["status"]
        .as_str()
        .and_then(RunStatus::parse)
        .unwrap_or(RunStatus::Running);

    let params: BTreeMap<String, String> = data["params"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| Some((string_field(&p["key"])?, string_field(&p["value"])?)))
        .collect();

    let metrics: BTreeMap<String, f64> = data["metrics"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| Some((string_field(&m["key"])?, m["value"].as_f64()?)))
        .collect();

    Some(RunRecord {
        info: RunInfo {
            run_id: RunId::new(run_id),
            experiment_id: string_field(&info["experiment_id"]).unwrap_or_default(),
            artifact_uri: string_field(&info["artifact_uri"]).unwrap_or_default(),
        },
        run_name: string_field(&info["run_name"]),
        status,
        params,
        metrics,
        start_time_ms: int_field(&info["start_time"]).unwrap_or_default(),
        end_time_ms: int_field(&info["end_time"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_payload() {
        let payload = json!({
            "info": {
                "run_id": "a1b2",
                "experiment_id": "3",
                "status": "FINISHED",
                "artifact_uri": "mlflow-artifacts:/3/a1b2/artifacts",
                "start_time": "1700000000000",
                "end_time": 1700000005000i64,
                "run_name": "trial-5"
            },
            "data": {
                "params": [
                    {"key": "learning_rate", "value": "0.1"},
                    {"key": "epochs", "value": "200"}
                ],
                "metrics": [
                    {"key": "accuracy", "value": 0.9667, "timestamp": 1, "step": 0},
                    {"key": "loss", "value": 0.12, "timestamp": 1, "step": 0}
                ]
            }
        });
        let record = parse_run(&payload).unwrap();
        assert_eq!(record.info.run_id.as_str(), "a1b2");
        assert_eq!(record.info.experiment_id, "3");
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(record.params["epochs"], "200");
        assert_eq!(record.metrics["accuracy"], 0.9667);
        assert_eq!(record.start_time_ms, 1_700_000_000_000);
        assert_eq!(record.end_time_ms, Some(1_700_000_005_000));
        assert_eq!(record.run_name.as_deref(), Some("trial-5"));
    }

    #[test]
    fn test_parse_run_without_data() {
        let record = parse_run(&json!({"info": {"run_uuid": "x", "status": "RUNNING"}})).unwrap();
        assert_eq!(record.info.run_id.as_str(), "x");
        assert!(record.params.is_empty());
        assert!(record.metrics.is_empty());
        assert!(parse_run(&json!({"info": {}})).is_none());
    }

    #[test]
    fn test_url_building() {
        let client = MlflowClient::new(
            "http://localhost:5000/",
            "iris-experiment",
            5,
            ArtifactStoreConfig::default(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(
            client.url("runs/create"),
            "http://localhost:5000/api/2.0/mlflow/runs/create"
        );
    }
}
