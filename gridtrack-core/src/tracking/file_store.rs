//! Local run store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<experiment>/<run_id>/run.json
//! <root>/<experiment>/<run_id>/artifacts/<artifact>/...
//! ```

use super::artifacts::{ArtifactRepository, safe_join};
use super::{ModelArtifact, RunInfo, RunRecord, RunStatus, TrackingBackend, now_ms};
use crate::error::{ArtifactError, TrackingError};
use crate::persistence::{atomic_write_json, load_json};
use crate::sweep::trial::RunId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Tracking backend that keeps runs as JSON files on disk.
pub struct FileTracking {
    root: PathBuf,
    experiment: String,
    // Serializes read-modify-write of run.json files.
    write_lock: Mutex<()>,
}

impl FileTracking {
    pub fn new(root: impl Into<PathBuf>, experiment: &str) -> Self {
        Self {
            root: root.into(),
            experiment: experiment.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.root.join(&self.experiment)
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.experiment_dir().join(run_id.as_str())
    }

    fn artifact_root(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }

    fn load(&self, run_id: &RunId) -> Result<RunRecord, TrackingError> {
        let path = self.run_dir(run_id).join("run.json");
        load_json::<RunRecord>(&path)
            .map_err(|e| TrackingError::store(&path, e))?
            .ok_or_else(|| TrackingError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    fn save(&self, record: &RunRecord) -> Result<(), TrackingError> {
        let path = self.run_dir(&record.info.run_id).join("run.json");
        atomic_write_json(&path, record).map_err(|e| TrackingError::store(&path, e))
    }

    async fn update<F>(&self, run_id: &RunId, f: F) -> Result<(), TrackingError>
    where
        F: FnOnce(&mut RunRecord) -> Result<(), TrackingError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(run_id)?;
        f(&mut record)?;
        self.save(&record)
    }

    /// List run ids in the experiment.
    pub fn list_runs(&self) -> Result<Vec<RunId>, TrackingError> {
        let dir = self.experiment_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| TrackingError::store(&dir, e))? {
            let entry = entry.map_err(|e| TrackingError::store(&dir, e))?;
            if entry.path().join("run.json").exists() {
                ids.push(RunId::new(entry.file_name().to_string_lossy()));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

#[async_trait]
impl TrackingBackend for FileTracking {
    fn name(&self) -> &str {
        "file"
    }

    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo, TrackingError> {
        let run_id = RunId::new(uuid::Uuid::new_v4().simple().to_string());
        let artifact_root = self.artifact_root(&run_id);
        std::fs::create_dir_all(&artifact_root)
            .map_err(|e| TrackingError::store(&artifact_root, e))?;

        let info = RunInfo {
            run_id,
            experiment_id: self.experiment.clone(),
            artifact_uri: format!("file://{}", artifact_root.display()),
        };
        let record = RunRecord {
            info: info.clone(),
            run_name: run_name.map(str::to_string),
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            start_time_ms: now_ms(),
            end_time_ms: None,
        };
        let _guard = self.write_lock.lock().await;
        self.save(&record)?;
        Ok(info)
    }

    async fn log_param(&self, run_id: &RunId, key: &str, value: &str) -> Result<(), TrackingError> {
        let path = self.run_dir(run_id);
        self.update(run_id, |record| {
            // Parameters are write-once, as in MLflow.
            if let Some(existing) = record.params.get(key) {
                if existing != value {
                    return Err(TrackingError::store(
                        &path,
                        format!("param '{key}' already logged with value '{existing}'"),
                    ));
                }
            }
            record.params.insert(key.to_string(), value.to_string());
            Ok(())
        })
        .await
    }

    async fn log_metric(
        &self,
        run_id: &RunId,
        key: &str,
        value: f64,
        _step: i64,
    ) -> Result<(), TrackingError> {
        self.update(run_id, |record| {
            record.metrics.insert(key.to_string(), value);
            Ok(())
        })
        .await
    }

    async fn log_artifact(
        &self,
        run: &RunInfo,
        artifact: &ModelArtifact,
    ) -> Result<(), ArtifactError> {
        let repo = ArtifactRepository::Local {
            root: self.artifact_root(&run.run_id),
        };
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
        let source = safe_join(&self.artifact_root(run_id), artifact_path)?;
        if !source.exists() {
            return Err(ArtifactError::NotFound {
                run_id: run_id.to_string(),
                path: artifact_path.to_string(),
            });
        }
        let target = safe_join(dest_dir, artifact_path)?;
        for entry in WalkDir::new(&source) {
            let entry = entry.map_err(|e| ArtifactError::Download {
                path: artifact_path.to_string(),
                message: e.to_string(),
            })?;
            let rel = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| ArtifactError::Download {
                    path: artifact_path.to_string(),
                    message: e.to_string(),
                })?;
            let out = target.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&out)?;
            } else {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &out)?;
            }
        }
        Ok(target)
    }

    async fn end_run(&self, run_id: &RunId, status: RunStatus) -> Result<(), TrackingError> {
        self.update(run_id, |record| {
            record.status = status;
            record.end_time_ms = Some(now_ms());
            Ok(())
        })
        .await
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord, TrackingError> {
        self.load(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = FileTracking::new(dir.path(), "iris-experiment");

        let run = store.start_run(Some("trial-0")).await.unwrap();
        assert_eq!(run.run_id.as_str().len(), 32);
        store.log_param(&run.run_id, "learning_rate", "0.1").await.unwrap();
        store.log_param(&run.run_id, "epochs", "200").await.unwrap();
        store.log_metric(&run.run_id, "accuracy", 0.9667, 0).await.unwrap();
        store.end_run(&run.run_id, RunStatus::Finished).await.unwrap();

        let record = store.get_run(&run.run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(record.run_name.as_deref(), Some("trial-0"));
        assert_eq!(record.params["learning_rate"], "0.1");
        assert_eq!(record.metrics["accuracy"], 0.9667);
        assert!(record.end_time_ms.is_some());
        assert_eq!(store.list_runs().unwrap(), vec![run.run_id.clone()]);
    }

    #[tokio::test]
    async fn test_params_are_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FileTracking::new(dir.path(), "exp");
        let run = store.start_run(None).await.unwrap();
        store.log_param(&run.run_id, "epochs", "50").await.unwrap();
        store.log_param(&run.run_id, "epochs", "50").await.unwrap();
        assert!(store.log_param(&run.run_id, "epochs", "100").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let dir = TempDir::new().unwrap();
        let store = FileTracking::new(dir.path(), "exp");
        let missing = RunId::new("nope");
        assert!(matches!(
            store.get_run(&missing).await,
            Err(TrackingError::RunNotFound { .. })
        ));
        assert!(store.log_metric(&missing, "loss", 0.1, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_artifact_roundtrip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FileTracking::new(dir.path().join("runs"), "exp");
        let run = store.start_run(None).await.unwrap();
        let artifact = ModelArtifact::new("model")
            .with_file("model.json", b"{\"classes\":3}".to_vec())
            .with_file("MLmodel", "flavor: logistic\n");
        store.log_artifact(&run, &artifact).await.unwrap();

        let dest = dir.path().join("best_model");
        for _ in 0..2 {
            let path = store
                .download_artifact(&run.run_id, "model", &dest)
                .await
                .unwrap();
            assert_eq!(path, dest.join("model"));
            assert_eq!(
                std::fs::read_to_string(path.join("model.json")).unwrap(),
                "{\"classes\":3}"
            );
            assert_eq!(
                std::fs::read_to_string(path.join("MLmodel")).unwrap(),
                "flavor: logistic\n"
            );
        }

        assert!(matches!(
            store.download_artifact(&run.run_id, "other", &dest).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }
}
