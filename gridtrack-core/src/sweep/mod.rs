//! Sweep engine.
//!
//! A sweep walks the [`SweepPlanner`]'s grid and, for each configuration,
//! opens a tracking run, trains on the blocking pool through a
//! [`TrialRunner`], records parameters, metrics and the model artifact
//! ([`RunRecorder`]), pushes gauges ([`MetricsPublisher`]), offers the result
//! to the [`BestRunSelector`] and, on improvement, refreshes the local copy
//! of the best model ([`ArtifactFetcher`]). [`SweepDriver`] ties them together.

pub mod driver;
pub mod fetcher;
pub mod planner;
pub mod publisher;
pub mod recorder;
pub mod selector;
pub mod summary;
pub mod trial;

pub use driver::{NoopObserver, SweepDriver, SweepEvent, SweepObserver};
pub use fetcher::{ArtifactFetcher, CachedArtifact, FetchOutcome};
pub use planner::{GridDimension, HyperparamGrid, ParamValue, PlanIter, SweepPlanner};
pub use publisher::{MetricsPublisher, PublishOutcome};
pub use recorder::{ArtifactLogOutcome, RecordOutcome, RunRecorder, TrackingRun};
pub use selector::{BestRunSelector, Selection, SweepState};
pub use summary::{BestRun, SweepSummary, TrialFailure, TrialReport};
pub use trial::{ModelHandle, RunId, TrainedModel, TrialConfig, TrialResult, TrialRunner};
