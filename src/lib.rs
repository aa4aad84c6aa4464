//! segtrain - training schedule and metrics core for semantic segmentation
//!
//! This crate implements the self-contained algorithmic pieces of a
//! segmentation training driver: cosine-annealing learning-rate cycles, a
//! polynomially decaying top-k budget for bootstrapped losses, stochastic
//! weight averaging over parameter snapshots, and a running confusion matrix
//! with accuracy/IoU scores. The surrounding model, autodiff, and data
//! pipeline belong to the hosting framework and are out of scope.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod snapshot;
pub mod swa;
pub mod utils;

// Re-exports
pub use checkpoint::{BestTracker, SwaCheckpoint};
pub use config::{
    CheckpointConfig, DatasetConfig, LoggingConfig, ScheduleConfig, TrainingConfig,
};
pub use driver::{IterationPlan, ScheduleDriver};
pub use error::{Error, Result};
pub use loss::{BootstrapCrossEntropy, SemanticEncodingLoss};
pub use metrics::{RunningConfusion, SegmentationScores};
pub use schedule::{CosineAnnealingLr, IterationSchedule, PolyTopK};
pub use snapshot::ParamSnapshot;
pub use swa::WeightAverager;
