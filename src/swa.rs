//! Stochastic weight averaging
//!
//! Maintains a running average of model parameter snapshots folded in at
//! annealing-period boundaries. The average is an exact arithmetic mean over
//! all snapshots seen, computed in place with O(1) memory in the number of
//! snapshots.

use ndarray::Zip;
use tracing::debug;

use crate::error::{Error, Result};
use crate::snapshot::ParamSnapshot;

/// Running average of parameter snapshots taken at period boundaries
#[derive(Debug, Clone, Default)]
pub struct WeightAverager {
    /// Averaged snapshot, absent until the first update
    averaged: Option<ParamSnapshot>,

    /// Number of snapshots folded in so far
    updates: u64,
}

impl WeightAverager {
    /// Create an averager with no accumulated state
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the current model snapshot into the running average
    ///
    /// Valid only when `iteration` is a positive exact multiple of `period`.
    /// The first invocation copies the snapshot; every later one updates each
    /// tensor in place as `avg += (current - avg) / (k + 1)`, which keeps the
    /// average equal to the arithmetic mean of all snapshots supplied so far.
    ///
    /// A snapshot whose parameter set differs from the first one seen is a
    /// structural-consistency violation and is reported as an error with the
    /// average left untouched.
    pub fn update(
        &mut self,
        snapshot: &ParamSnapshot,
        iteration: u64,
        period: u64,
    ) -> Result<()> {
        if period == 0 {
            return Err(Error::schedule("averaging period must be positive"));
        }
        if iteration == 0 || iteration % period != 0 {
            return Err(Error::schedule(format!(
                "weight average update at iteration {} is not a multiple of period {}",
                iteration, period
            )));
        }

        match self.averaged.as_mut() {
            None => {
                self.averaged = Some(snapshot.clone());
                self.updates = 1;
            }
            Some(averaged) => {
                averaged.ensure_compatible(snapshot)?;

                let denom = (self.updates + 1) as f32;
                for ((_, avg_tensor), (_, cur_tensor)) in
                    averaged.iter_mut().zip(snapshot.iter())
                {
                    Zip::from(avg_tensor)
                        .and(cur_tensor)
                        .for_each(|avg, &cur| *avg += (cur - *avg) / denom);
                }
                self.updates += 1;
            }
        }

        debug!(
            iteration,
            updates = self.updates,
            "folded snapshot into weight average"
        );
        Ok(())
    }

    /// Averaged snapshot, `None` before the first update
    pub fn averaged(&self) -> Option<&ParamSnapshot> {
        self.averaged.as_ref()
    }

    /// Number of snapshots folded in so far
    pub fn num_updates(&self) -> u64 {
        self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::ArrayD;

    fn snapshot_of(value: f32) -> ParamSnapshot {
        ParamSnapshot::from_pairs(vec![
            ("w".to_string(), ArrayD::from_elem(vec![2, 3], value)),
            ("b".to_string(), ArrayD::from_elem(vec![3], value * 2.0)),
        ])
    }

    #[test]
    fn test_first_update_copies_snapshot() {
        let mut averager = WeightAverager::new();
        assert!(averager.averaged().is_none());

        averager.update(&snapshot_of(3.0), 100, 100).unwrap();
        assert_eq!(averager.num_updates(), 1);

        let avg = averager.averaged().unwrap();
        assert_relative_eq!(avg.get("w").unwrap()[[0, 0]], 3.0, epsilon = 1e-6);
        assert_relative_eq!(avg.get("b").unwrap()[[1]], 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_average_equals_arithmetic_mean() {
        let values = [1.0f32, 4.0, 7.0, 2.0, 11.0];
        let mut averager = WeightAverager::new();
        for (i, &v) in values.iter().enumerate() {
            let iteration = (i as u64 + 1) * 50;
            averager.update(&snapshot_of(v), iteration, 50).unwrap();
        }

        let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
        let avg = averager.averaged().unwrap();
        for &w in avg.get("w").unwrap().iter() {
            assert_relative_eq!(w, mean, epsilon = 1e-6);
        }
        for &b in avg.get("b").unwrap().iter() {
            assert_relative_eq!(b, mean * 2.0, epsilon = 1e-6);
        }
        assert_eq!(averager.num_updates(), values.len() as u64);
    }

    #[test]
    fn test_off_boundary_update_rejected() {
        let mut averager = WeightAverager::new();
        assert!(averager.update(&snapshot_of(1.0), 99, 100).is_err());
        assert!(averager.update(&snapshot_of(1.0), 0, 100).is_err());
        assert!(averager.update(&snapshot_of(1.0), 100, 0).is_err());
        assert!(averager.averaged().is_none());
    }

    #[test]
    fn test_structural_mismatch_rejected() {
        let mut averager = WeightAverager::new();
        averager.update(&snapshot_of(1.0), 100, 100).unwrap();

        let mismatched = ParamSnapshot::from_pairs(vec![(
            "w".to_string(),
            ArrayD::from_elem(vec![2, 3], 1.0f32),
        )]);
        assert!(averager.update(&mismatched, 200, 100).is_err());

        // average is untouched by the failed update
        assert_eq!(averager.num_updates(), 1);
        assert_relative_eq!(
            averager.averaged().unwrap().get("w").unwrap()[[0, 0]],
            1.0,
            epsilon = 1e-6
        );
    }
}
