//! Keeps a local copy of the best run's model artifact.

use crate::persistence::{replace_dir, sibling};
use crate::sweep::selector::BestRunSelector;
use crate::sweep::trial::RunId;
use crate::tracking::TrackingBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What happened to a fetch of the best run's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Downloaded { path: PathBuf },
    /// A newer best appeared before this fetch could complete.
    Superseded,
    Failed { reason: String },
}

/// Artifact currently held in the destination directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub run_id: RunId,
    pub generation: u64,
    pub path: PathBuf,
}

/// Downloads the best run's artifact into `<dest>/<artifact_name>`.
///
/// Fetches run one at a time. Each download lands in a staging directory
/// and is swapped into place only if its run is still the best, so the
/// destination always holds one complete artifact of some best run.
pub struct ArtifactFetcher {
    backend: Arc<dyn TrackingBackend>,
    selector: Arc<BestRunSelector>,
    dest_dir: PathBuf,
    artifact_name: String,
    cached: Mutex<Option<CachedArtifact>>,
}

impl ArtifactFetcher {
    pub fn new(
        backend: Arc<dyn TrackingBackend>,
        selector: Arc<BestRunSelector>,
        dest_dir: impl Into<PathBuf>,
        artifact_name: &str,
    ) -> Self {
        Self {
            backend,
            selector,
            dest_dir: dest_dir.into(),
            artifact_name: artifact_name.to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Final location of the artifact.
    pub fn target(&self) -> PathBuf {
        self.dest_dir.join(&self.artifact_name)
    }

    pub async fn cached(&self) -> Option<CachedArtifact> {
        self.cached.lock().await.clone()
    }

    pub async fn fetch(&self, run_id: &RunId, generation: u64) -> FetchOutcome {
        let mut cached = self.cached.lock().await;
        if !self.selector.is_current(run_id, generation) {
            tracing::debug!(run_id = %run_id, generation, "Skipping fetch of superseded run");
            return FetchOutcome::Superseded;
        }

        let target = self.target();
        let staging = sibling(&target, "staging");
        let outcome = match self.download_into(run_id, &staging, &target, generation).await {
            Ok(FetchOutcome::Downloaded { path }) => {
                *cached = Some(CachedArtifact {
                    run_id: run_id.clone(),
                    generation,
                    path: path.clone(),
                });
                tracing::info!(run_id = %run_id, path = %path.display(), "Downloaded best model artifacts");
                FetchOutcome::Downloaded { path }
            }
            Ok(other) => other,
            Err(reason) => {
                tracing::warn!(run_id = %run_id, error = %reason, "Failed to download best model artifacts");
                FetchOutcome::Failed { reason }
            }
        };
        if let Err(e) = remove_dir_if_present(&staging).await {
            tracing::debug!(path = %staging.display(), error = %e, "Failed to clean staging directory");
        }
        outcome
    }

    async fn download_into(
        &self,
        run_id: &RunId,
        staging: &Path,
        target: &Path,
        generation: u64,
    ) -> Result<FetchOutcome, String> {
        remove_dir_if_present(staging)
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| e.to_string())?;
        let downloaded = self
            .backend
            .download_artifact(run_id, &self.artifact_name, staging)
            .await
            .map_err(|e| e.to_string())?;
        if !self.selector.is_current(run_id, generation) {
            return Ok(FetchOutcome::Superseded);
        }
        let swap_target = target.to_path_buf();
        tokio::task::spawn_blocking(move || replace_dir(&downloaded, &swap_target))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        Ok(FetchOutcome::Downloaded {
            path: target.to_path_buf(),
        })
    }
}

async fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArtifactError;
    use crate::sweep::trial::{TrainedModel, TrialConfig, TrialResult};
    use crate::tracking::{FileTracking, ModelArtifact};
    use tempfile::TempDir;

    #[derive(Debug)]
    struct NullModel;

    impl TrainedModel for NullModel {
        fn flavor(&self) -> &str {
            "null"
        }

        fn to_artifact(&self, name: &str, _run_id: &RunId) -> Result<ModelArtifact, ArtifactError> {
            Ok(ModelArtifact::new(name))
        }
    }

    async fn logged_run(store: &FileTracking, body: &str) -> RunId {
        let run = store.start_run(None).await.unwrap();
        store
            .log_artifact(&run, &ModelArtifact::new("model").with_file("model.json", body))
            .await
            .unwrap();
        run.run_id
    }

    fn offer(selector: &BestRunSelector, run_id: &RunId, accuracy: f64) -> u64 {
        let result = TrialResult {
            config: TrialConfig::new(0, Vec::new()),
            run_id: run_id.clone(),
            accuracy,
            loss: 0.1,
            model: Arc::new(NullModel),
        };
        match selector.offer(&result) {
            crate::sweep::selector::Selection::Improved { generation, .. } => generation,
            other => panic!("expected improvement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTracking::new(dir.path().join("runs"), "exp"));
        let run_id = logged_run(&store, "{\"v\":1}").await;
        let selector = Arc::new(BestRunSelector::new());
        let generation = offer(&selector, &run_id, 0.9);

        let dest = dir.path().join("best_model");
        let fetcher = ArtifactFetcher::new(store, selector, &dest, "model");
        for _ in 0..2 {
            let outcome = fetcher.fetch(&run_id, generation).await;
            assert_eq!(
                outcome,
                FetchOutcome::Downloaded {
                    path: dest.join("model")
                }
            );
        }
        assert_eq!(
            std::fs::read_to_string(dest.join("model/model.json")).unwrap(),
            "{\"v\":1}"
        );
        let entries: Vec<_> = std::fs::read_dir(&dest).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fetcher.cached().await.unwrap().run_id, run_id);
    }

    #[tokio::test]
    async fn test_new_best_replaces_artifact() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTracking::new(dir.path().join("runs"), "exp"));
        let first = logged_run(&store, "first").await;
        let second = logged_run(&store, "second").await;
        let selector = Arc::new(BestRunSelector::new());
        let dest = dir.path().join("best_model");
        let fetcher = ArtifactFetcher::new(store, selector.clone(), &dest, "model");

        let g1 = offer(&selector, &first, 0.5);
        fetcher.fetch(&first, g1).await;
        let g2 = offer(&selector, &second, 0.6);
        fetcher.fetch(&second, g2).await;

        assert_eq!(
            std::fs::read_to_string(dest.join("model/model.json")).unwrap(),
            "second"
        );
        assert_eq!(fetcher.fetch(&first, g1).await, FetchOutcome::Superseded);
        assert_eq!(
            std::fs::read_to_string(dest.join("model/model.json")).unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn test_failure_leaves_state_and_cache() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTracking::new(dir.path().join("runs"), "exp"));
        let run = store.start_run(None).await.unwrap();
        let selector = Arc::new(BestRunSelector::new());
        let generation = offer(&selector, &run.run_id, 0.9);
        let fetcher = ArtifactFetcher::new(store, selector.clone(), dir.path().join("best"), "model");

        let outcome = fetcher.fetch(&run.run_id, generation).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
        assert!(selector.is_current(&run.run_id, generation));
        assert!(fetcher.cached().await.is_none());
        assert!(!dir.path().join("best/.model.staging").exists());
    }

    #[tokio::test]
    async fn test_stale_staging_is_discarded() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTracking::new(dir.path().join("runs"), "exp"));
        let run_id = logged_run(&store, "fresh").await;
        let selector = Arc::new(BestRunSelector::new());
        let generation = offer(&selector, &run_id, 0.7);

        let dest = dir.path().join("best_model");
        let staging = dest.join(".model.staging");
        std::fs::create_dir_all(staging.join("model")).unwrap();
        std::fs::write(staging.join("model/leftover.bin"), "stale").unwrap();

        let fetcher = ArtifactFetcher::new(store, selector, &dest, "model");
        let outcome = fetcher.fetch(&run_id, generation).await;
        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                path: dest.join("model")
            }
        );
        assert!(!staging.exists());
        assert!(!dest.join("model/leftover.bin").exists());
        assert_eq!(
            std::fs::read_to_string(dest.join("model/model.json")).unwrap(),
            "fresh"
        );
    }
}
