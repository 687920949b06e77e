//! Seeded synthetic Gaussian clusters.

use super::{DataSplit, Dataset, DatasetProvider};
use gridtrack_core::error::DatasetError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Range the cluster centres are drawn from, per feature.
const CENTER_BOX: f64 = 4.0;

/// One isotropic Gaussian cluster per class.
#[derive(Debug, Clone)]
pub struct BlobsProvider {
    pub samples: usize,
    pub features: usize,
    pub classes: usize,
    pub spread: f64,
    pub test_fraction: f64,
    pub seed: u64,
}

impl BlobsProvider {
    pub fn generate(&self) -> Result<Dataset, DatasetError> {
        if self.classes < 2 || self.features == 0 {
            return Err(DatasetError::InvalidParameter {
                message: format!(
                    "need at least 2 classes and 1 feature, got {} and {}",
                    self.classes, self.features
                ),
            });
        }
        if self.samples < self.classes {
            return Err(DatasetError::TooSmall {
                message: format!("{} samples for {} classes", self.samples, self.classes),
            });
        }
        if !(self.spread.is_finite() && self.spread > 0.0) {
            return Err(DatasetError::InvalidParameter {
                message: format!("spread must be positive, got {}", self.spread),
            });
        }

        let noise = Normal::new(0.0, self.spread).map_err(|e| DatasetError::InvalidParameter {
            message: format!("spread {}: {e}", self.spread),
        })?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers: Vec<Vec<f64>> = (0..self.classes)
            .map(|_| {
                (0..self.features)
                    .map(|_| rng.gen_range(-CENTER_BOX..CENTER_BOX))
                    .collect()
            })
            .collect();

        let mut features = Vec::with_capacity(self.samples);
        let mut labels = Vec::with_capacity(self.samples);
        for i in 0..self.samples {
            let class = i % self.classes;
            let sample = centers[class]
                .iter()
                .map(|c| c + noise.sample(&mut rng))
                .collect();
            features.push(sample);
            labels.push(class);
        }

        Ok(Dataset {
            feature_names: (0..self.features).map(|i| format!("x{i}")).collect(),
            class_names: (0..self.classes).map(|i| format!("class_{i}")).collect(),
            features,
            labels,
        })
    }
}

impl DatasetProvider for BlobsProvider {
    fn describe(&self) -> String {
        format!(
            "blobs ({} samples, {} features, {} classes, spread {})",
            self.samples, self.features, self.classes, self.spread
        )
    }

    fn get_split(&self) -> Result<DataSplit, DatasetError> {
        self.generate()?.split(self.test_fraction, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> BlobsProvider {
        BlobsProvider {
            samples: 150,
            features: 4,
            classes: 3,
            spread: 1.0,
            test_fraction: 0.2,
            seed: 42,
        }
    }

    #[test]
    fn test_generate_shape_and_balance() {
        let ds = provider().generate().unwrap();
        assert_eq!(ds.len(), 150);
        assert!(ds.features.iter().all(|x| x.len() == 4));
        for class in 0..3 {
            assert_eq!(ds.labels.iter().filter(|&&l| l == class).count(), 50);
        }
        assert_eq!(ds.class_names, vec!["class_0", "class_1", "class_2"]);
    }

    #[test]
    fn test_generate_is_deterministic() {
        assert_eq!(provider().generate().unwrap(), provider().generate().unwrap());
        let other = BlobsProvider {
            seed: 7,
            ..provider()
        };
        assert_ne!(provider().generate().unwrap(), other.generate().unwrap());
    }

    #[test]
    fn test_sample_moments() {
        let wide = BlobsProvider {
            samples: 4000,
            classes: 2,
            features: 1,
            spread: 2.0,
            ..provider()
        };
        let ds = wide.generate().unwrap();
        let class0: Vec<f64> = ds
            .features
            .iter()
            .zip(&ds.labels)
            .filter(|(_, l)| **l == 0)
            .map(|(x, _)| x[0])
            .collect();
        let mean = class0.iter().sum::<f64>() / class0.len() as f64;
        let var = class0.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / class0.len() as f64;
        assert!((var.sqrt() - 2.0).abs() < 0.15, "std was {}", var.sqrt());
    }

    #[test]
    fn test_noise_is_drawn_after_centres() {
        let p = BlobsProvider {
            samples: 2,
            features: 2,
            classes: 2,
            spread: 0.5,
            ..provider()
        };
        let ds = p.generate().unwrap();

        let mut rng = StdRng::seed_from_u64(p.seed);
        let centers: Vec<f64> = (0..4).map(|_| rng.gen_range(-CENTER_BOX..CENTER_BOX)).collect();
        let noise = Normal::new(0.0, 0.5).unwrap();
        let first = centers[0] + noise.sample(&mut rng);
        assert_eq!(ds.features[0][0], first);
    }

    #[test]
    fn test_invalid_parameters() {
        let one_class = BlobsProvider {
            classes: 1,
            ..provider()
        };
        assert!(one_class.generate().is_err());
        let flat = BlobsProvider {
            spread: 0.0,
            ..provider()
        };
        assert!(flat.generate().is_err());
        let tiny = BlobsProvider {
            samples: 2,
            ..provider()
        };
        assert!(matches!(tiny.generate(), Err(DatasetError::TooSmall { .. })));
    }
}
