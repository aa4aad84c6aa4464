//! Parameter snapshot structures
//!
//! A [`ParamSnapshot`] is an ordered mapping from parameter name to a tensor of
//! fixed shape, capturing the full set of trainable weights at one instant.
//! Two snapshots with the same parameter-name set and shapes are structurally
//! compatible for averaging.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Ordered collection of named parameter tensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSnapshot {
    /// Parameter tensors keyed by name, iterated in name order
    params: BTreeMap<String, ArrayD<f32>>,
}

impl ParamSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self {
            params: BTreeMap::new(),
        }
    }

    /// Build a snapshot from name/tensor pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, ArrayD<f32>)>,
    {
        Self {
            params: pairs.into_iter().collect(),
        }
    }

    /// Insert or replace a parameter tensor
    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.params.insert(name.into(), tensor);
    }

    /// Get a parameter tensor by name
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.params.get(name)
    }

    /// Iterate over name/tensor pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f32>)> {
        self.params.iter()
    }

    /// Iterate over name/tensor pairs mutably, in name order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ArrayD<f32>)> {
        self.params.iter_mut()
    }

    /// Parameter names in iteration order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    /// Number of parameter tensors
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the snapshot holds no tensors
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar parameters across all tensors
    pub fn num_parameters(&self) -> usize {
        self.params.values().map(|t| t.len()).sum()
    }

    /// Check structural compatibility: same parameter names, same shapes
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.params.len() == other.params.len()
            && self.params.iter().all(|(name, tensor)| {
                other
                    .params
                    .get(name)
                    .map_or(false, |o| o.shape() == tensor.shape())
            })
    }

    /// Error unless `other` is structurally compatible with `self`
    pub fn ensure_compatible(&self, other: &Self) -> Result<()> {
        if self.params.len() != other.params.len() {
            return Err(Error::snapshot(format!(
                "parameter count mismatch: expected {}, got {}",
                self.params.len(),
                other.params.len()
            )));
        }

        for (name, tensor) in &self.params {
            match other.params.get(name) {
                None => {
                    return Err(Error::snapshot(format!("missing parameter '{}'", name)));
                }
                Some(o) if o.shape() != tensor.shape() => {
                    return Err(Error::snapshot(format!(
                        "shape mismatch for '{}': expected {:?}, got {:?}",
                        name,
                        tensor.shape(),
                        o.shape()
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

impl Default for ParamSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn tensor(shape: &[usize], value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(shape, value)
    }

    #[test]
    fn test_snapshot_ordering_and_counts() {
        let mut snap = ParamSnapshot::new();
        snap.insert("encoder.weight", tensor(&[4, 3], 1.0));
        snap.insert("classifier.bias", tensor(&[19], 0.0));

        let names: Vec<_> = snap.names().cloned().collect();
        assert_eq!(names, vec!["classifier.bias", "encoder.weight"]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.num_parameters(), 4 * 3 + 19);
    }

    #[test]
    fn test_compatibility_checks() {
        let a = ParamSnapshot::from_pairs(vec![
            ("w".to_string(), tensor(&[2, 2], 1.0)),
            ("b".to_string(), tensor(&[2], 0.0)),
        ]);
        let b = ParamSnapshot::from_pairs(vec![
            ("w".to_string(), tensor(&[2, 2], 5.0)),
            ("b".to_string(), tensor(&[2], -1.0)),
        ]);
        assert!(a.is_compatible_with(&b));
        assert!(a.ensure_compatible(&b).is_ok());

        let wrong_shape =
            ParamSnapshot::from_pairs(vec![("w".to_string(), tensor(&[2, 3], 0.0))]);
        assert!(!a.is_compatible_with(&wrong_shape));
        assert!(a.ensure_compatible(&wrong_shape).is_err());

        let wrong_name = ParamSnapshot::from_pairs(vec![
            ("w".to_string(), tensor(&[2, 2], 0.0)),
            ("bias".to_string(), tensor(&[2], 0.0)),
        ]);
        assert!(a.ensure_compatible(&wrong_name).is_err());
    }
}
