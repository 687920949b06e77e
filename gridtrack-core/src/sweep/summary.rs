//! Per-trial reports and the end-of-sweep summary.

use crate::sweep::fetcher::{CachedArtifact, FetchOutcome};
use crate::sweep::planner::ParamValue;
use crate::sweep::publisher::PublishOutcome;
use crate::sweep::recorder::ArtifactLogOutcome;
use crate::sweep::selector::{Selection, SweepState};
use crate::sweep::trial::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything that happened to one completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    pub index: usize,
    pub params: Vec<(String, ParamValue)>,
    pub run_id: RunId,
    pub accuracy: f64,
    pub loss: f64,
    pub artifact_log: ArtifactLogOutcome,
    /// `false` when the tracking backend refused to close the run.
    pub run_closed: bool,
    pub publish: PublishOutcome,
    pub selection: Selection,
    /// `None` when the trial did not become the best.
    pub fetch: Option<FetchOutcome>,
    pub duration_ms: u64,
}

/// A trial that failed fatally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub index: usize,
    pub params: Vec<(String, ParamValue)>,
    pub run_id: Option<RunId>,
    pub error: String,
}

/// The winning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRun {
    pub run_id: RunId,
    pub accuracy: f64,
}

impl BestRun {
    pub fn from_state(state: &SweepState) -> Option<Self> {
        match (&state.best_run_id, state.best_accuracy) {
            (Some(run_id), Some(accuracy)) => Some(Self {
                run_id: run_id.clone(),
                accuracy,
            }),
            _ => None,
        }
    }
}

/// Outcome of a whole sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub experiment: String,
    pub trials_planned: usize,
    pub trials_completed: usize,
    pub trials_failed: Vec<TrialFailure>,
    pub best: Option<BestRun>,
    /// Artifact in the destination directory; may lag `best` if a fetch failed.
    pub cached_artifact: Option<CachedArtifact>,
    /// Completed trials in planner order.
    pub reports: Vec<TrialReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepSummary {
    /// Whether the cached artifact belongs to the best run.
    pub fn artifact_is_current(&self) -> bool {
        match (&self.best, &self.cached_artifact) {
            (Some(best), Some(cached)) => best.run_id == cached.run_id,
            _ => false,
        }
    }

    pub fn report_for(&self, run_id: &RunId) -> Option<&TrialReport> {
        self.reports.iter().find(|r| &r.run_id == run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_best_run_from_state() {
        assert_eq!(BestRun::from_state(&SweepState::default()), None);
        let state = SweepState {
            best_accuracy: Some(0.9),
            best_run_id: Some(RunId::new("r1")),
            generation: 1,
        };
        assert_eq!(
            BestRun::from_state(&state),
            Some(BestRun {
                run_id: RunId::new("r1"),
                accuracy: 0.9
            })
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let now = Utc::now();
        let summary = SweepSummary {
            experiment: "iris-experiment".into(),
            trials_planned: 1,
            trials_completed: 1,
            trials_failed: Vec::new(),
            best: Some(BestRun {
                run_id: RunId::new("r1"),
                accuracy: 0.9,
            }),
            cached_artifact: Some(CachedArtifact {
                run_id: RunId::new("r1"),
                generation: 1,
                path: PathBuf::from("best_model/model"),
            }),
            reports: vec![TrialReport {
                index: 0,
                params: vec![("epochs".into(), ParamValue::Int(50))],
                run_id: RunId::new("r1"),
                accuracy: 0.9,
                loss: 0.2,
                artifact_log: ArtifactLogOutcome::Logged,
                run_closed: true,
                publish: PublishOutcome::Failed("refused".into()),
                selection: Selection::Improved {
                    previous: None,
                    generation: 1,
                },
                fetch: Some(FetchOutcome::Downloaded {
                    path: PathBuf::from("best_model/model"),
                }),
                duration_ms: 12,
            }],
            started_at: now,
            finished_at: now,
        };
        assert!(summary.artifact_is_current());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["best"]["run_id"], "r1");
        assert_eq!(json["reports"][0]["artifact_log"]["status"], "logged");
        assert_eq!(json["reports"][0]["publish"]["status"], "failed");
        assert_eq!(json["reports"][0]["publish"]["reason"], "refused");
        assert_eq!(json["reports"][0]["selection"]["status"], "improved");
        assert_eq!(json["reports"][0]["fetch"]["status"], "downloaded");

        let back: SweepSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, summary);
    }
}
