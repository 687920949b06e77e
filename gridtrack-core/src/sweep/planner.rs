//! Grid sweep planning.
//!
//! The planner enumerates the Cartesian product of the grid's dimensions in
//! nested-loop order: dimensions are visited in declaration order and the
//! first (outermost) dimension varies slowest.

use crate::error::ConfigError;
use crate::sweep::trial::TrialConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Text(s) => s.parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            ParamValue::Float(_) => None,
            ParamValue::Text(s) => s.parse().ok(),
        }
    }

    /// Parse a CLI-style literal: integers first, then floats, else text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::Text(raw.to_string())
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            // Debug keeps the trailing `.0` so 1.0 is logged as "1.0", not "1".
            ParamValue::Float(v) => write!(f, "{v:?}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// One axis of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDimension {
    pub name: String,
    pub values: Vec<ParamValue>,
}

impl GridDimension {
    pub fn new(name: &str, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    /// Parse `name=v1,v2,...`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (name, values) = raw.split_once('=').ok_or_else(|| ConfigError::InvalidGrid {
            message: format!("expected NAME=V1,V2,... but got '{raw}'"),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidGrid {
                message: format!("missing dimension name in '{raw}'"),
            });
        }
        let values = values
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(ParamValue::parse)
            .collect();
        Ok(Self::new(name, values))
    }
}

/// Ordered set of dimensions to sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperparamGrid {
    #[serde(default)]
    pub dimensions: Vec<GridDimension>,
}

impl HyperparamGrid {
    pub fn new(dimensions: Vec<GridDimension>) -> Self {
        Self { dimensions }
    }

    /// Number of configurations the grid expands to.
    pub fn trial_count(&self) -> usize {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions
            .iter()
            .map(|d| d.values.len())
            .try_fold(1usize, |acc, n| acc.checked_mul(n))
            .unwrap_or(usize::MAX)
    }

    /// Replace a dimension with the same name, or append it.
    pub fn set_dimension(&mut self, dimension: GridDimension) {
        match self
            .dimensions
            .iter_mut()
            .find(|d| d.name == dimension.name)
        {
            Some(existing) => existing.values = dimension.values,
            None => self.dimensions.push(dimension),
        }
    }

    /// Reject grids that would produce an empty or ambiguous sweep.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::InvalidGrid {
                message: "grid has no dimensions".into(),
            });
        }
        for (i, dim) in self.dimensions.iter().enumerate() {
            if dim.name.trim().is_empty() {
                return Err(ConfigError::InvalidGrid {
                    message: format!("dimension {i} has an empty name"),
                });
            }
            if self.dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(ConfigError::InvalidGrid {
                    message: format!("dimension '{}' declared twice", dim.name),
                });
            }
            if dim.values.is_empty() {
                return Err(ConfigError::InvalidGrid {
                    message: format!("dimension '{}' has no values", dim.name),
                });
            }
            for (j, value) in dim.values.iter().enumerate() {
                if matches!(value, ParamValue::Float(f) if !f.is_finite()) {
                    return Err(ConfigError::InvalidGrid {
                        message: format!("dimension '{}' has non-finite value {value}", dim.name),
                    });
                }
                if dim.values[..j].contains(value) {
                    return Err(ConfigError::InvalidGrid {
                        message: format!("dimension '{}' repeats value {value}", dim.name),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Produces the ordered trial configurations of a grid.
#[derive(Debug, Clone)]
pub struct SweepPlanner {
    grid: HyperparamGrid,
}

impl SweepPlanner {
    pub fn new(grid: HyperparamGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &HyperparamGrid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.trial_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily enumerate configurations. Each call starts from the beginning.
    pub fn iter(&self) -> PlanIter<'_> {
        PlanIter {
            grid: &self.grid,
            next: 0,
            total: self.grid.trial_count(),
        }
    }
}

impl<'a> IntoIterator for &'a SweepPlanner {
    type Item = TrialConfig;
    type IntoIter = PlanIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a grid's configurations.
#[derive(Debug, Clone)]
pub struct PlanIter<'a> {
    grid: &'a HyperparamGrid,
    next: usize,
    total: usize,
}

impl Iterator for PlanIter<'_> {
    type Item = TrialConfig;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        // Mixed-radix decode with the last dimension as the least significant digit.
        let mut rem = index;
        let mut params = Vec::with_capacity(self.grid.dimensions.len());
        for dim in self.grid.dimensions.iter().rev() {
            let n = dim.values.len();
            params.push((dim.name.clone(), dim.values[rem % n].clone()));
            rem /= n;
        }
        params.reverse();
        Some(TrialConfig::new(index, params))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for PlanIter<'_> {}
