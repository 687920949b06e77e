//! Running best-run selection.

use crate::sweep::trial::{RunId, TrialResult};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Best run seen so far. `None` until the first result is offered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepState {
    pub best_accuracy: Option<f64>,
    pub best_run_id: Option<RunId>,
    /// Bumped on every improvement; identifies which best a fetch belongs to.
    pub generation: u64,
}

/// Result of offering a trial to the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Selection {
    /// The offered run is the new best.
    Improved {
        previous: Option<RunId>,
        generation: u64,
    },
    /// The incumbent stays.
    NotImproved { incumbent: Option<RunId> },
}

impl Selection {
    pub fn is_improved(&self) -> bool {
        matches!(self, Selection::Improved { .. })
    }
}

/// Keeps the highest-accuracy run. Ties go to the run offered first.
#[derive(Debug, Default)]
pub struct BestRunSelector {
    state: Mutex<SweepState>,
}

impl BestRunSelector {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave SweepState half-updated.
    fn lock(&self) -> MutexGuard<'_, SweepState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn offer(&self, result: &TrialResult) -> Selection {
        let mut state = self.lock();
        let improved = match state.best_accuracy {
            None => true,
            Some(best) => result.accuracy > best,
        };
        if !improved {
            return Selection::NotImproved {
                incumbent: state.best_run_id.clone(),
            };
        }
        let previous = state.best_run_id.replace(result.run_id.clone());
        state.best_accuracy = Some(result.accuracy);
        state.generation += 1;
        tracing::debug!(
            run_id = %result.run_id,
            accuracy = result.accuracy,
            generation = state.generation,
            "New best run"
        );
        Selection::Improved {
            previous,
            generation: state.generation,
        }
    }

    pub fn snapshot(&self) -> SweepState {
        self.lock().clone()
    }

    /// Whether `(run_id, generation)` is still the best.
    pub fn is_current(&self, run_id: &RunId, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation && state.best_run_id.as_ref() == Some(run_id)
    }
}
