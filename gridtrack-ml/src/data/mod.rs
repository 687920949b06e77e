//! Datasets and the fixed train/test split shared by every trial.

pub mod blobs;
pub mod csv;

pub use blobs::BlobsProvider;
pub use csv::CsvProvider;

use gridtrack_core::config::{DatasetConfig, DatasetSource};
use gridtrack_core::error::DatasetError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A labelled numeric dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub class_names: Vec<String>,
    /// Row-major samples.
    pub features: Vec<Vec<f64>>,
    /// Class index per sample.
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Seeded shuffle, then the first `ceil(n * test_fraction)` samples are held out.
    pub fn split(&self, test_fraction: f64, seed: u64) -> Result<DataSplit, DatasetError> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(DatasetError::InvalidParameter {
                message: format!("test fraction {test_fraction} is not in (0, 1)"),
            });
        }
        let n = self.len();
        let n_test = (n as f64 * test_fraction).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(DatasetError::TooSmall {
                message: format!("{n} samples cannot be split with test fraction {test_fraction}"),
            });
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (test_idx, train_idx) = order.split_at(n_test);

        let take = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<usize>) {
            idx.iter()
                .map(|&i| (self.features[i].clone(), self.labels[i]))
                .unzip()
        };
        let (x_train, y_train) = take(train_idx);
        let (x_test, y_test) = take(test_idx);
        Ok(DataSplit {
            x_train,
            x_test,
            y_train,
            y_test,
            feature_names: self.feature_names.clone(),
            class_names: self.class_names.clone(),
        })
    }
}

/// Train and held-out partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    pub x_train: Vec<Vec<f64>>,
    pub x_test: Vec<Vec<f64>>,
    pub y_train: Vec<usize>,
    pub y_test: Vec<usize>,
    pub feature_names: Vec<String>,
    pub class_names: Vec<String>,
}

impl DataSplit {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_classes(&self) -> usize {
        self.class_names.len()
    }
}

/// Supplies the split every trial trains and evaluates on.
pub trait DatasetProvider: Send + Sync {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    fn get_split(&self) -> Result<DataSplit, DatasetError>;
}

/// Build the provider named by the dataset configuration.
pub fn provider_from_config(config: &DatasetConfig) -> Box<dyn DatasetProvider> {
    match &config.source {
        DatasetSource::Csv {
            path,
            label_column,
            delimiter,
        } => Box::new(CsvProvider {
            path: path.clone(),
            label_column: label_column.clone(),
            delimiter: *delimiter,
            test_fraction: config.test_fraction,
            seed: config.seed,
        }),
        DatasetSource::Blobs {
            samples,
            features,
            classes,
            spread,
        } => Box::new(BlobsProvider {
            samples: *samples,
            features: *features,
            classes: *classes,
            spread: *spread,
            test_fraction: config.test_fraction,
            seed: config.seed,
        }),
    }
}
