//! Shared fixtures: a fake MLflow server, a fake Pushgateway and stub runners.

#![allow(dead_code)]

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use gridtrack_core::error::{ArtifactError, TrainingError};
use gridtrack_core::sweep::{ParamValue, RunId, TrainedModel, TrialConfig, TrialResult, TrialRunner};
use gridtrack_core::tracking::ModelArtifact;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Fake MLflow tracking server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FakeRun {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: Option<String>,
    pub status: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl FakeRun {
    fn artifact_root(&self) -> String {
        format!("{}/{}/artifacts", self.experiment_id, self.run_id)
    }

    fn to_json(&self) -> Value {
        json!({
            "info": {
                "run_id": self.run_id,
                "run_uuid": self.run_id,
                "experiment_id": self.experiment_id,
                "run_name": self.run_name,
                "status": self.status,
                "start_time": self.start_time.to_string(),
                "end_time": self.end_time,
                "artifact_uri": format!("mlflow-artifacts:/{}", self.artifact_root()),
            },
            "data": {
                "params": self.params.iter().map(|(k, v)| json!({"key": k, "value": v})).collect::<Vec<_>>(),
                "metrics": self.metrics.iter().map(|(k, v)| json!({"key": k, "value": v, "step": 0})).collect::<Vec<_>>(),
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct MlflowState {
    pub experiments: BTreeMap<String, String>,
    pub experiment_creates: usize,
    pub runs: BTreeMap<String, FakeRun>,
    /// Artifact bytes keyed by path under the proxy root.
    pub artifacts: BTreeMap<String, Vec<u8>>,
    pub fail_artifact_uploads: bool,
    pub fail_metrics: bool,
}

pub type SharedMlflow = Arc<Mutex<MlflowState>>;

pub struct FakeMlflow {
    pub url: String,
    pub state: SharedMlflow,
}

impl FakeMlflow {
    pub async fn start() -> Self {
        let state = SharedMlflow::default();
        let app = Router::new()
            .route(
                "/api/2.0/mlflow/experiments/get-by-name",
                get(get_experiment_by_name),
            )
            .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
            .route("/api/2.0/mlflow/runs/create", post(create_run))
            .route("/api/2.0/mlflow/runs/log-parameter", post(log_parameter))
            .route("/api/2.0/mlflow/runs/log-metric", post(log_metric))
            .route("/api/2.0/mlflow/runs/update", post(update_run))
            .route("/api/2.0/mlflow/runs/get", get(get_run))
            .route("/api/2.0/mlflow/artifacts/list", get(list_artifacts))
            .route(
                "/api/2.0/mlflow-artifacts/artifacts/{*path}",
                put(put_artifact).get(get_artifact),
            )
            .with_state(state.clone());
        let addr = serve(app).await;
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn runs(&self) -> Vec<FakeRun> {
        self.state.lock().unwrap().runs.values().cloned().collect()
    }

    pub fn run(&self, run_id: &RunId) -> FakeRun {
        self.state.lock().unwrap().runs[run_id.as_str()].clone()
    }

    pub fn set_fail_artifact_uploads(&self, fail: bool) {
        self.state.lock().unwrap().fail_artifact_uploads = fail;
    }

    pub fn set_fail_metrics(&self, fail: bool) {
        self.state.lock().unwrap().fail_metrics = fail;
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error_code": "RESOURCE_DOES_NOT_EXIST", "message": message})),
    )
        .into_response()
}

async fn get_experiment_by_name(
    State(state): State<SharedMlflow>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let name = q.get("experiment_name").cloned().unwrap_or_default();
    let state = state.lock().unwrap();
    match state.experiments.get(&name) {
        Some(id) => Json(json!({"experiment": {"experiment_id": id, "name": name}})).into_response(),
        None => not_found("experiment not found"),
    }
}

async fn create_experiment(State(state): State<SharedMlflow>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let id = (state.experiments.len() + 1).to_string();
    state.experiments.insert(name, id.clone());
    state.experiment_creates += 1;
    Json(json!({"experiment_id": id})).into_response()
}

async fn create_run(State(state): State<SharedMlflow>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let run = FakeRun {
        run_id: uuid::Uuid::new_v4().simple().to_string(),
        experiment_id: body["experiment_id"].as_str().unwrap_or_default().to_string(),
        run_name: body["run_name"].as_str().map(str::to_string),
        status: "RUNNING".into(),
        start_time: body["start_time"].as_i64().unwrap_or_default(),
        ..Default::default()
    };
    let response = json!({"run": run.to_json()});
    state.runs.insert(run.run_id.clone(), run);
    Json(response).into_response()
}

async fn log_parameter(State(state): State<SharedMlflow>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let run_id = body["run_id"].as_str().unwrap_or_default();
    let Some(run) = state.runs.get_mut(run_id) else {
        return not_found("run not found");
    };
    run.params.insert(
        body["key"].as_str().unwrap_or_default().to_string(),
        body["value"].as_str().unwrap_or_default().to_string(),
    );
    Json(json!({})).into_response()
}

async fn log_metric(State(state): State<SharedMlflow>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    if state.fail_metrics {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics store down").into_response();
    }
    let run_id = body["run_id"].as_str().unwrap_or_default();
    let Some(run) = state.runs.get_mut(run_id) else {
        return not_found("run not found");
    };
    run.metrics.insert(
        body["key"].as_str().unwrap_or_default().to_string(),
        body["value"].as_f64().unwrap_or(f64::NAN),
    );
    Json(json!({})).into_response()
}

async fn update_run(State(state): State<SharedMlflow>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let run_id = body["run_id"].as_str().unwrap_or_default();
    let Some(run) = state.runs.get_mut(run_id) else {
        return not_found("run not found");
    };
    run.status = body["status"].as_str().unwrap_or("FINISHED").to_string();
    run.end_time = body["end_time"].as_i64();
    Json(json!({"run_info": {"run_id": run_id, "status": run.status}})).into_response()
}

async fn get_run(
    State(state): State<SharedMlflow>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let state = state.lock().unwrap();
    let run_id = q.get("run_id").cloned().unwrap_or_default();
    match state.runs.get(&run_id) {
        Some(run) => Json(json!({"run": run.to_json()})).into_response(),
        None => not_found("run not found"),
    }
}

async fn list_artifacts(
    State(state): State<SharedMlflow>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let state = state.lock().unwrap();
    let run_id = q.get("run_id").cloned().unwrap_or_default();
    let Some(run) = state.runs.get(&run_id) else {
        return not_found("run not found");
    };
    let root = run.artifact_root();
    let path = q.get("path").cloned().unwrap_or_default();
    let prefix = if path.is_empty() {
        format!("{root}/")
    } else {
        format!("{root}/{path}/")
    };

    let mut entries: BTreeSet<(String, bool)> = BTreeSet::new();
    for key in state.artifacts.keys() {
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        let rel_base = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        match rest.split_once('/') {
            Some((dir, _)) => entries.insert((format!("{rel_base}{dir}"), true)),
            None => entries.insert((format!("{rel_base}{rest}"), false)),
        };
    }
    let files: Vec<Value> = entries
        .into_iter()
        .map(|(p, is_dir)| json!({"path": p, "is_dir": is_dir}))
        .collect();
    let mut body = json!({"root_uri": format!("mlflow-artifacts:/{root}")});
    if !files.is_empty() {
        body["files"] = json!(files);
    }
    Json(body).into_response()
}

async fn put_artifact(
    State(state): State<SharedMlflow>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.fail_artifact_uploads {
        return (StatusCode::INTERNAL_SERVER_ERROR, "artifact store unavailable").into_response();
    }
    state.artifacts.insert(path, body.to_vec());
    Json(json!({})).into_response()
}

async fn get_artifact(State(state): State<SharedMlflow>, Path(path): Path<String>) -> Response {
    let state = state.lock().unwrap();
    match state.artifacts.get(&path) {
        Some(bytes) => bytes.clone().into_response(),
        None => not_found("artifact not found"),
    }
}

// ---------------------------------------------------------------------------
// Fake Pushgateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Push {
    pub job: String,
    pub content_type: String,
    pub body: String,
}

pub struct FakePushgateway {
    pub url: String,
    pub pushes: Arc<Mutex<Vec<Push>>>,
}

impl FakePushgateway {
    pub async fn start() -> Self {
        let pushes: Arc<Mutex<Vec<Push>>> = Arc::default();
        let app = Router::new()
            .route("/metrics/job/{job}", put(record_push))
            .with_state(pushes.clone());
        let addr = serve(app).await;
        Self {
            url: format!("http://{addr}"),
            pushes,
        }
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }
}

async fn record_push(
    State(pushes): State<Arc<Mutex<Vec<Push>>>>,
    Path(job): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    pushes.lock().unwrap().push(Push {
        job,
        content_type,
        body,
    });
    StatusCode::OK
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ---------------------------------------------------------------------------
// Stub trial runner
// ---------------------------------------------------------------------------

/// Model whose artifact records which run produced it.
#[derive(Debug)]
pub struct StubModel {
    pub accuracy: f64,
}

impl TrainedModel for StubModel {
    fn flavor(&self) -> &str {
        "stub"
    }

    fn to_artifact(&self, name: &str, run_id: &RunId) -> Result<ModelArtifact, ArtifactError> {
        let body = json!({"run_id": run_id.as_str(), "accuracy": self.accuracy});
        Ok(ModelArtifact::new(name)
            .with_file("model.json", body.to_string())
            .with_file("MLmodel", format!("flavors:\n  stub: {{}}\nrun_id: {run_id}\n")))
    }
}

/// Scores configurations from a fixed table keyed by `TrialConfig::label()`.
pub struct TableRunner {
    scores: HashMap<String, f64>,
    delays_ms: HashMap<String, u64>,
}

impl TableRunner {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            delays_ms: HashMap::new(),
        }
    }

    pub fn with_delay(mut self, label: &str, ms: u64) -> Self {
        self.delays_ms.insert(label.to_string(), ms);
        self
    }
}

impl TrialRunner for TableRunner {
    fn name(&self) -> &str {
        "table"
    }

    fn run(&self, config: &TrialConfig, run_id: &RunId) -> Result<TrialResult, TrainingError> {
        let label = config.label();
        if let Some(ms) = self.delays_ms.get(&label) {
            std::thread::sleep(std::time::Duration::from_millis(*ms));
        }
        let accuracy = *self.scores.get(&label).ok_or_else(|| TrainingError::Diverged {
            iterations: 0,
            reason: format!("no score for {label}"),
        })?;
        Ok(TrialResult {
            config: config.clone(),
            run_id: run_id.clone(),
            accuracy,
            loss: 1.0 - accuracy,
            model: Arc::new(StubModel { accuracy }),
        })
    }
}

/// The scores of the 3x3 learning-rate/epochs grid used by the scenarios.
pub fn iris_like_scores() -> Vec<(&'static str, f64)> {
    vec![
        ("learning_rate=0.01, epochs=50", 0.70),
        ("learning_rate=0.01, epochs=100", 0.80),
        ("learning_rate=0.01, epochs=200", 0.8333),
        ("learning_rate=0.1, epochs=50", 0.90),
        ("learning_rate=0.1, epochs=100", 0.9333),
        ("learning_rate=0.1, epochs=200", 0.9667),
        ("learning_rate=1.0, epochs=50", 0.9333),
        ("learning_rate=1.0, epochs=100", 0.9333),
        ("learning_rate=1.0, epochs=200", 0.9667),
    ]
}

pub fn param(config: &[(String, ParamValue)], name: &str) -> Option<ParamValue> {
    config.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}
