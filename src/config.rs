//! Configuration for segmentation training runs
//!
//! Nested configuration structures covering the annealing schedule, dataset
//! shape, logging cadence, and checkpoint placement, with validation and
//! YAML/JSON file loading.

use ndarray::Array1;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils;

/// Median-frequency loss weights for the 19 Cityscapes training classes
pub static CITYSCAPES_CLASS_WEIGHTS: Lazy<Array1<f32>> = Lazy::new(|| {
    Array1::from(vec![
        0.055_705_16,
        0.323_374_77,
        0.089_985_44,
        1.036_027_07,
        1.034_131_47,
        1.681_954_37,
        5.585_405_48,
        3.565_639_95,
        0.127_049_78,
        1.0,
        0.467_837_19,
        1.345_515_28,
        5.299_741_14,
        0.283_425_31,
        0.939_609_5,
        0.815_518_11,
        0.426_791_46,
        3.639_907_4,
        2.783_761_94,
    ])
});

/// Main training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Annealing schedule parameters
    pub schedule: ScheduleConfig,

    /// Dataset shape and label conventions
    pub dataset: DatasetConfig,

    /// Logging cadence
    pub logging: LoggingConfig,

    /// Checkpoint placement
    pub checkpointing: CheckpointConfig,
}

/// Annealing schedule parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Base learning rate scaled by the cosine multiplier each iteration
    pub base_lr: f64,

    /// Number of training epochs
    pub num_epochs: usize,

    /// Mini-batch size
    pub batch_size: usize,

    /// Number of training samples in the dataset split
    pub dataset_size: usize,

    /// Epochs per cosine half-cycle; the LR period in iterations is this
    /// times the iterations per epoch
    pub lr_period_epochs: usize,

    /// Top-k base value at iteration 0
    pub topk_init: f64,

    /// Polynomial decay exponent for the top-k schedule
    pub topk_power: f64,

    /// Pixels per top-k base step
    pub topk_unit: u64,
}

/// Dataset shape and label conventions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name
    pub name: String,

    /// Number of semantic classes
    pub n_classes: usize,

    /// Label value excluded from loss and metrics
    pub ignore_label: u32,

    /// Optional per-class loss weights, one positive entry per class
    pub class_weights: Option<Vec<f32>>,
}

/// Logging cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Iterations between training metric windows
    pub log_interval: usize,
}

/// Checkpoint placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory receiving checkpoint files
    pub weight_dir: PathBuf,

    /// File name for the running SWA snapshot
    pub swa_filename: String,

    /// File name for the best-metric checkpoint
    pub best_filename: String,
}

impl ScheduleConfig {
    /// Mini-batches per epoch, rounding up for the final partial batch
    pub fn iterations_per_epoch(&self) -> u64 {
        ((self.dataset_size + self.batch_size - 1) / self.batch_size) as u64
    }

    /// Cosine half-cycle length in iterations
    pub fn lr_period(&self) -> u64 {
        self.lr_period_epochs as u64 * self.iterations_per_epoch()
    }

    /// Total iterations the run will execute
    pub fn max_iteration(&self) -> u64 {
        self.num_epochs as u64 * self.iterations_per_epoch()
    }
}

impl DatasetConfig {
    /// Class weights as a tensor, if configured
    pub fn class_weight_tensor(&self) -> Option<Array1<f32>> {
        self.class_weights.as_ref().map(|w| Array1::from(w.clone()))
    }
}

impl TrainingConfig {
    /// Load configuration from a YAML or JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = utils::config::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if s.base_lr <= 0.0 {
            return Err(Error::config("base learning rate must be positive"));
        }
        if s.num_epochs == 0 {
            return Err(Error::config("number of epochs must be positive"));
        }
        if s.batch_size == 0 {
            return Err(Error::config("batch size must be positive"));
        }
        if s.dataset_size == 0 {
            return Err(Error::config("dataset size must be positive"));
        }
        if s.lr_period_epochs == 0 {
            return Err(Error::config("LR period must span at least one epoch"));
        }
        if s.topk_init <= 0.0 {
            return Err(Error::config("top-k init value must be positive"));
        }
        if s.topk_power <= 0.0 {
            return Err(Error::config("top-k decay power must be positive"));
        }
        if s.topk_unit == 0 {
            return Err(Error::config("top-k unit must be positive"));
        }
        if s.lr_period() > s.max_iteration() {
            return Err(Error::config(format!(
                "LR period of {} epochs exceeds the {}-epoch run",
                s.lr_period_epochs, s.num_epochs
            )));
        }

        let d = &self.dataset;
        if d.n_classes == 0 {
            return Err(Error::config("number of classes must be positive"));
        }
        if (d.ignore_label as usize) < d.n_classes {
            return Err(Error::config(format!(
                "ignore label {} collides with class range 0..{}",
                d.ignore_label, d.n_classes
            )));
        }
        if let Some(weights) = &d.class_weights {
            if weights.len() != d.n_classes {
                return Err(Error::config(format!(
                    "expected {} class weights, got {}",
                    d.n_classes,
                    weights.len()
                )));
            }
            if weights.iter().any(|&w| w <= 0.0 || !w.is_finite()) {
                return Err(Error::config("class weights must be positive and finite"));
            }
        }

        if self.logging.log_interval == 0 {
            return Err(Error::config("log interval must be positive"));
        }

        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            dataset: DatasetConfig::default(),
            logging: LoggingConfig::default(),
            checkpointing: CheckpointConfig::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            base_lr: 2.5e-3,
            num_epochs: 200,
            batch_size: 7,
            dataset_size: 2975,
            lr_period_epochs: 20,
            topk_init: 512.0,
            topk_power: 0.95,
            topk_unit: 512,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "cityscapes".to_string(),
            n_classes: 19,
            ignore_label: 250,
            class_weights: Some(CITYSCAPES_CLASS_WEIGHTS.to_vec()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { log_interval: 31 }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            weight_dir: PathBuf::from("weights"),
            swa_filename: "swa_model.bin".to_string(),
            best_filename: "best_model.bin".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = TrainingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dataset.class_weights.as_ref().unwrap().len(), 19);
    }

    #[test]
    fn test_derived_schedule_quantities() {
        let schedule = ScheduleConfig::default();
        // 2975 samples at batch size 7 -> 425 iterations per epoch
        assert_eq!(schedule.iterations_per_epoch(), 425);
        assert_eq!(schedule.lr_period(), 20 * 425);
        assert_eq!(schedule.max_iteration(), 200 * 425);
    }

    #[test]
    fn test_partial_final_batch_rounds_up() {
        let schedule = ScheduleConfig {
            dataset_size: 10,
            batch_size: 4,
            ..ScheduleConfig::default()
        };
        assert_eq!(schedule.iterations_per_epoch(), 3);
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let mut config = TrainingConfig::default();
        config.schedule.base_lr = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.dataset.ignore_label = 5;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.dataset.class_weights = Some(vec![1.0; 3]);
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.schedule.lr_period_epochs = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.yaml");

        let config = TrainingConfig::default();
        crate::utils::config::save_config(&config, &path).unwrap();
        let loaded = TrainingConfig::from_file(&path).unwrap();

        assert_eq!(loaded.schedule.num_epochs, config.schedule.num_epochs);
        assert_eq!(loaded.dataset.n_classes, config.dataset.n_classes);
    }
}
