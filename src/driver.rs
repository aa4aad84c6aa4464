//! Schedule driver composing the per-iteration training controls
//!
//! The driver owns the two annealing schedules and the weight averager, and
//! answers one question per mini-batch: which learning rate, which top-k
//! budget, and whether this iteration closes an annealing period. It replaces
//! the ambient mutable state of a hand-written loop with one explicit context
//! object.

use tracing::{debug, instrument};

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::schedule::{CosineAnnealingLr, PolyTopK};
use crate::snapshot::ParamSnapshot;
use crate::swa::WeightAverager;

/// Per-iteration schedule decisions
#[derive(Debug, Clone, PartialEq)]
pub struct IterationPlan {
    /// Global iteration the plan applies to
    pub iteration: u64,

    /// Cosine multiplier in `[0, 1]`
    pub lr_multiplier: f64,

    /// Base learning rate scaled by the multiplier
    pub learning_rate: f64,

    /// Pixel budget for the bootstrapped loss
    pub topk_pixels: u64,

    /// Whether this iteration closes an annealing period and the weight
    /// averager should fold in a snapshot
    pub swa_boundary: bool,
}

/// Context object driving the annealing schedules and weight averaging
#[derive(Debug)]
pub struct ScheduleDriver {
    lr_schedule: CosineAnnealingLr,
    topk_schedule: PolyTopK,
    averager: WeightAverager,
    base_lr: f64,
    topk_unit: u64,
    lr_period: u64,
}

impl ScheduleDriver {
    /// Build a driver from a validated training configuration
    #[instrument(skip(config))]
    pub fn new(config: &TrainingConfig) -> Result<Self> {
        config.validate()?;

        let schedule = &config.schedule;
        let lr_period = schedule.lr_period();
        let lr_schedule = CosineAnnealingLr::new(lr_period)?;
        let topk_schedule = PolyTopK::new(
            schedule.topk_init,
            schedule.max_iteration(),
            schedule.topk_power,
        )?;

        debug!(
            lr_period,
            max_iteration = schedule.max_iteration(),
            "schedule driver initialized"
        );

        Ok(Self {
            lr_schedule,
            topk_schedule,
            averager: WeightAverager::new(),
            base_lr: schedule.base_lr,
            topk_unit: schedule.topk_unit,
            lr_period,
        })
    }

    /// Schedule decisions for the given global iteration
    ///
    /// The iteration counter starts at 1 for the first mini-batch; 0 is a
    /// caller bug.
    pub fn plan(&self, iteration: u64) -> Result<IterationPlan> {
        if iteration == 0 {
            return Err(Error::schedule("iteration counter starts at 1"));
        }

        let lr_multiplier = self.lr_schedule.multiplier(iteration);
        let swa_boundary = iteration % self.lr_period == 0;
        if swa_boundary {
            debug!(iteration, "annealing period boundary");
        }

        Ok(IterationPlan {
            iteration,
            lr_multiplier,
            learning_rate: self.base_lr * lr_multiplier,
            topk_pixels: self.topk_schedule.selection_count(iteration, self.topk_unit),
            swa_boundary,
        })
    }

    /// Fold a period-boundary snapshot into the running weight average
    pub fn fold_snapshot(&mut self, snapshot: &ParamSnapshot, iteration: u64) -> Result<()> {
        self.averager.update(snapshot, iteration, self.lr_period)
    }

    /// Averaged snapshot, `None` before the first fold
    pub fn averaged(&self) -> Option<&ParamSnapshot> {
        self.averager.averaged()
    }

    /// Number of snapshots folded so far
    pub fn num_swa_updates(&self) -> u64 {
        self.averager.num_updates()
    }

    /// Cosine half-cycle length in iterations
    pub fn lr_period(&self) -> u64 {
        self.lr_period
    }

    /// Total iterations the configured run will execute
    pub fn max_iteration(&self) -> u64 {
        self.topk_schedule.max_iteration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::ArrayD;

    fn small_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.schedule.dataset_size = 20;
        config.schedule.batch_size = 4; // 5 iterations per epoch
        config.schedule.num_epochs = 8;
        config.schedule.lr_period_epochs = 2; // period of 10 iterations
        config
    }

    #[test]
    fn test_plan_rejects_iteration_zero() {
        let driver = ScheduleDriver::new(&small_config()).unwrap();
        assert!(driver.plan(0).is_err());
    }

    #[test]
    fn test_plan_at_boundary_restores_base_lr() {
        let config = small_config();
        let driver = ScheduleDriver::new(&config).unwrap();
        assert_eq!(driver.lr_period(), 10);

        let plan = driver.plan(10).unwrap();
        assert!(plan.swa_boundary);
        assert_relative_eq!(plan.lr_multiplier, 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            plan.learning_rate,
            config.schedule.base_lr,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_plan_mid_cycle_decays() {
        let driver = ScheduleDriver::new(&small_config()).unwrap();
        let early = driver.plan(1).unwrap();
        let mid = driver.plan(5).unwrap();
        assert!(!early.swa_boundary);
        assert!(mid.learning_rate < early.learning_rate);
        assert_relative_eq!(mid.lr_multiplier, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_topk_budget_shrinks_over_run() {
        let driver = ScheduleDriver::new(&small_config()).unwrap();
        let start = driver.plan(1).unwrap().topk_pixels;
        let end = driver.plan(driver.max_iteration()).unwrap().topk_pixels;
        assert!(start > end);
        assert_eq!(end, 0);
    }

    #[test]
    fn test_snapshot_folding_respects_boundaries() {
        let mut driver = ScheduleDriver::new(&small_config()).unwrap();
        let snapshot = ParamSnapshot::from_pairs(vec![(
            "w".to_string(),
            ArrayD::from_elem(vec![2], 1.0f32),
        )]);

        assert!(driver.fold_snapshot(&snapshot, 7).is_err());
        driver.fold_snapshot(&snapshot, 10).unwrap();
        driver.fold_snapshot(&snapshot, 20).unwrap();
        assert_eq!(driver.num_swa_updates(), 2);
        assert!(driver.averaged().is_some());
    }
}
