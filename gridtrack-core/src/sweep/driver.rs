//! Drives a sweep: open run, train, record, publish, select, fetch.

use crate::config::{FailurePolicy, SweepConfig};
use crate::error::{SweepError, TrainingError};
use crate::gateway::{MetricsGateway, PushGateway};
use crate::persistence::atomic_write_json;
use crate::sweep::fetcher::ArtifactFetcher;
use crate::sweep::planner::SweepPlanner;
use crate::sweep::publisher::MetricsPublisher;
use crate::sweep::recorder::RunRecorder;
use crate::sweep::selector::{BestRunSelector, Selection, SweepState};
use crate::sweep::summary::{BestRun, SweepSummary, TrialFailure, TrialReport};
use crate::sweep::trial::{RunId, TrialConfig, TrialResult, TrialRunner};
use crate::tracking::{TrackingBackend, connect_backend};
use futures::StreamExt;
use futures::future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Progress notifications emitted while a sweep runs.
#[derive(Debug)]
pub enum SweepEvent<'a> {
    Started {
        experiment: &'a str,
        trials: usize,
        max_parallel: usize,
    },
    TrialStarted {
        config: &'a TrialConfig,
    },
    TrialCompleted {
        report: &'a TrialReport,
    },
    TrialFailed {
        failure: &'a TrialFailure,
    },
    Finished {
        summary: &'a SweepSummary,
    },
    /// A trial failed under the abort policy; in-flight trials have drained.
    Aborted {
        index: usize,
        error: &'a SweepError,
    },
}

/// Receives [`SweepEvent`]s.
pub trait SweepObserver: Send + Sync {
    fn on_event(&self, event: &SweepEvent<'_>);
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SweepObserver for NoopObserver {
    fn on_event(&self, _event: &SweepEvent<'_>) {}
}

struct FailedTrial {
    failure: TrialFailure,
    error: SweepError,
}

/// Runs every configuration of a plan through the sweep pipeline.
pub struct SweepDriver {
    experiment: String,
    runner: Arc<dyn TrialRunner>,
    recorder: RunRecorder,
    publisher: MetricsPublisher,
    selector: Arc<BestRunSelector>,
    fetcher: ArtifactFetcher,
    observer: Arc<dyn SweepObserver>,
    max_parallel: usize,
    on_failure: FailurePolicy,
    summary_path: Option<PathBuf>,
}

impl SweepDriver {
    /// Assemble a driver from explicit collaborators.
    pub fn new(
        config: &SweepConfig,
        backend: Arc<dyn TrackingBackend>,
        gateway: Option<Arc<dyn MetricsGateway>>,
        runner: Arc<dyn TrialRunner>,
    ) -> Self {
        let artifact_name = &config.artifact_store.artifact_name;
        let selector = Arc::new(BestRunSelector::new());
        let publisher = match gateway {
            Some(gateway) => MetricsPublisher::new(gateway, &config.gateway),
            None => MetricsPublisher::disabled(),
        };
        Self {
            experiment: config.experiment_name.clone(),
            runner,
            recorder: RunRecorder::new(backend.clone(), artifact_name),
            publisher,
            selector: selector.clone(),
            fetcher: ArtifactFetcher::new(
                backend,
                selector,
                &config.output.best_model_dir,
                artifact_name,
            ),
            observer: Arc::new(NoopObserver),
            max_parallel: config.execution.max_parallel_trials.max(1),
            on_failure: config.execution.on_trial_failure,
            summary_path: config.output.summary_path.clone(),
        }
    }

    /// Connect the tracking backend and gateway named in `config`.
    pub fn from_config(
        config: &SweepConfig,
        runner: Arc<dyn TrialRunner>,
    ) -> Result<Self, SweepError> {
        let backend = connect_backend(config)?;
        let gateway: Option<Arc<dyn MetricsGateway>> = if config.gateway.enabled {
            Some(Arc::new(PushGateway::new(
                &config.gateway.url,
                config.gateway.timeout_secs,
            )?))
        } else {
            None
        };
        Ok(Self::new(config, backend, gateway, runner))
    }

    pub fn with_observer(mut self, observer: Arc<dyn SweepObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> SweepState {
        self.selector.snapshot()
    }

    /// Run every planned trial and return the summary.
    ///
    /// Under [`FailurePolicy::Abort`] the first fatal trial error stops new
    /// trials from starting; trials already in flight finish and are kept in
    /// the written summary before the error is returned.
    pub async fn run(&self, planner: &SweepPlanner) -> Result<SweepSummary, SweepError> {
        let started_at = chrono::Utc::now();
        tracing::info!(
            experiment = %self.experiment,
            trials = planner.len(),
            max_parallel = self.max_parallel,
            runner = self.runner.name(),
            "Starting sweep"
        );
        self.observer.on_event(&SweepEvent::Started {
            experiment: &self.experiment,
            trials: planner.len(),
            max_parallel: self.max_parallel,
        });

        let abort = AtomicBool::new(false);
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        let mut first_error: Option<(usize, SweepError)> = None;

        let mut trials = futures::stream::iter(planner.iter())
            .take_while(|_| future::ready(!abort.load(Ordering::SeqCst)))
            .map(|config| self.run_trial(config))
            .buffer_unordered(self.max_parallel);

        while let Some(outcome) = trials.next().await {
            match outcome {
                Ok(report) => {
                    self.observer
                        .on_event(&SweepEvent::TrialCompleted { report: &report });
                    reports.push(report);
                }
                Err(FailedTrial { failure, error }) => {
                    tracing::error!(
                        trial = failure.index,
                        run_id = ?failure.run_id.as_ref().map(RunId::as_str),
                        error = %error,
                        "Trial failed"
                    );
                    self.observer
                        .on_event(&SweepEvent::TrialFailed { failure: &failure });
                    if self.on_failure == FailurePolicy::Abort {
                        abort.store(true, Ordering::SeqCst);
                        if first_error.is_none() {
                            first_error = Some((failure.index, error));
                        }
                    }
                    failures.push(failure);
                }
            }
        }
        drop(trials);

        reports.sort_by_key(|r| r.index);
        failures.sort_by_key(|f| f.index);
        let state = self.selector.snapshot();
        let summary = SweepSummary {
            experiment: self.experiment.clone(),
            trials_planned: planner.len(),
            trials_completed: reports.len(),
            trials_failed: failures,
            best: BestRun::from_state(&state),
            cached_artifact: self.fetcher.cached().await,
            reports,
            started_at,
            finished_at: chrono::Utc::now(),
        };
        self.write_summary(&summary);

        if let Some((index, error)) = first_error {
            self.observer.on_event(&SweepEvent::Aborted {
                index,
                error: &error,
            });
            return Err(SweepError::TrialAborted {
                index,
                source: Box::new(error),
            });
        }

        match &summary.best {
            Some(best) => tracing::info!(
                run_id = %best.run_id,
                accuracy = best.accuracy,
                completed = summary.trials_completed,
                failed = summary.trials_failed.len(),
                "Sweep finished"
            ),
            None => tracing::warn!(
                failed = summary.trials_failed.len(),
                "Sweep finished without a completed trial"
            ),
        }
        self.observer.on_event(&SweepEvent::Finished { summary: &summary });
        Ok(summary)
    }

    async fn run_trial(&self, config: TrialConfig) -> Result<TrialReport, FailedTrial> {
        let started = Instant::now();
        self.observer
            .on_event(&SweepEvent::TrialStarted { config: &config });

        let run = match self.recorder.open(&config).await {
            Ok(run) => run,
            Err(e) => return Err(failed(&config, None, e.into())),
        };
        let run_id = run.run_id().clone();

        let result = match self.train(&config, &run_id).await {
            Ok(result) => result,
            Err(e) => {
                let error = SweepError::Training(e);
                self.recorder.abandon(run, &error).await;
                return Err(failed(&config, Some(run_id), error));
            }
        };
        tracing::info!(
            trial = config.index,
            run_id = %run_id,
            accuracy = result.accuracy,
            loss = result.loss,
            "Trial trained"
        );

        let record = match self.recorder.record(run, &result).await {
            Ok(record) => record,
            Err(e) => return Err(failed(&config, Some(run_id), e)),
        };
        let publish = self.publisher.publish(&result).await;
        let selection = self.selector.offer(&result);
        let fetch = match &selection {
            Selection::Improved { generation, .. } => {
                Some(self.fetcher.fetch(&result.run_id, *generation).await)
            }
            Selection::NotImproved { .. } => None,
        };

        Ok(TrialReport {
            index: config.index,
            params: config.params().to_vec(),
            run_id,
            accuracy: result.accuracy,
            loss: result.loss,
            artifact_log: record.artifact,
            run_closed: record.closed,
            publish,
            selection,
            fetch,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Train on the blocking pool and validate the scores.
    async fn train(&self, config: &TrialConfig, run_id: &RunId) -> Result<TrialResult, TrainingError> {
        let runner = self.runner.clone();
        let task_config = config.clone();
        let task_run_id = run_id.clone();
        let mut result = tokio::task::spawn_blocking(move || runner.run(&task_config, &task_run_id))
            .await
            .map_err(|e| TrainingError::Task {
                message: e.to_string(),
            })??;
        if &result.run_id != run_id {
            tracing::warn!(
                expected = %run_id,
                got = %result.run_id,
                "Runner returned a foreign run id; using the tracking run's"
            );
            result.run_id = run_id.clone();
        }
        result.check_scores()?;
        Ok(result)
    }

    fn write_summary(&self, summary: &SweepSummary) {
        let Some(path) = &self.summary_path else {
            return;
        };
        match atomic_write_json(path, summary) {
            Ok(()) => tracing::debug!(path = %path.display(), "Wrote sweep summary"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write sweep summary")
            }
        }
    }
}

fn failed(config: &TrialConfig, run_id: Option<RunId>, error: SweepError) -> FailedTrial {
    FailedTrial {
        failure: TrialFailure {
            index: config.index,
            params: config.params().to_vec(),
            run_id,
            error: error.to_string(),
        },
        error,
    }
}
