//! # gridtrack ML
//!
//! The model side of a sweep: dataset providers and the train/test split,
//! multinomial logistic regression, held-out metrics and
//! [`LogisticTrialRunner`], the default [`gridtrack_core::TrialRunner`].

pub mod data;
pub mod logistic;
pub mod metrics;
pub mod runner;

pub use data::{DataSplit, Dataset, DatasetProvider, provider_from_config};
pub use logistic::{LogisticModel, LogisticParams};
pub use runner::LogisticTrialRunner;
