//! Checkpoint persistence and best-model tracking
//!
//! The training loop persists the running SWA snapshot after every averaging
//! event and keeps a separate best checkpoint selected by validation mean IoU.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::snapshot::ParamSnapshot;
use crate::utils;

/// Persisted stochastic-weight-average state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwaCheckpoint {
    /// Averaged parameter snapshot
    pub snapshot: ParamSnapshot,

    /// Number of snapshots folded into the average
    pub updates: u64,

    /// Global iteration at which the checkpoint was taken
    pub iteration: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SwaCheckpoint {
    /// Create a checkpoint from the current averaged snapshot
    pub fn new(snapshot: ParamSnapshot, updates: u64, iteration: u64) -> Self {
        Self {
            snapshot,
            updates,
            iteration,
            created_at: Utc::now(),
        }
    }

    /// Serialize to disk with an atomic write
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            utils::io::ensure_dir_exists(parent)?;
        }

        let bytes = bincode::serialize(self)?;
        utils::io::write_file_atomic(path, &bytes)?;

        info!(
            path = %path.display(),
            updates = self.updates,
            iteration = self.iteration,
            "saved SWA checkpoint"
        );
        Ok(())
    }

    /// Load a previously saved checkpoint
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !utils::io::is_file_readable(path) {
            return Err(Error::checkpoint(format!(
                "no checkpoint found at '{}'",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let checkpoint: Self = bincode::deserialize(&bytes)?;
        Ok(checkpoint)
    }
}

/// Tracks the best validation mean IoU seen so far
///
/// Comparison uses `>=` so an equal score refreshes the checkpoint.
#[derive(Debug, Clone)]
pub struct BestTracker {
    best: f64,
}

impl BestTracker {
    /// Start with no recorded score; any real score improves on the sentinel
    pub fn new() -> Self {
        Self {
            best: f64::NEG_INFINITY,
        }
    }

    /// Resume tracking from a score restored out of a checkpoint
    pub fn resume(best: f64) -> Self {
        Self { best }
    }

    /// Record a score; returns true when it ties or beats the best so far
    pub fn observe(&mut self, mean_iou: f64) -> bool {
        if mean_iou >= self.best {
            self.best = mean_iou;
            true
        } else {
            false
        }
    }

    /// Best score seen, `None` before the first observation
    pub fn best(&self) -> Option<f64> {
        if self.best.is_finite() {
            Some(self.best)
        } else {
            None
        }
    }
}

impl Default for BestTracker {
    fn default() -> Self {
        Self::new()
    }
}
