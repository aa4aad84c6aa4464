//! Running confusion matrix and segmentation scores
//!
//! Accumulates a pixel-level confusion matrix across batches and derives
//! accuracy/IoU metrics on demand. One accumulation window spans a logging
//! interval or a validation pass; callers `reset` between windows so they
//! never leak into each other.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Label value marking pixels excluded from evaluation
pub const DEFAULT_IGNORE_LABEL: u32 = 250;

/// Pixel-level confusion matrix accumulated across batches
#[derive(Debug, Clone)]
pub struct RunningConfusion {
    /// Number of classes
    n_classes: usize,

    /// Label excluded from accumulation
    ignore_label: u32,

    /// `matrix[[gt, pred]]` counts pixels of ground-truth class `gt`
    /// predicted as class `pred`
    matrix: Array2<u64>,
}

/// Scalar metrics derived from a confusion matrix
///
/// Mean accuracy and mean IoU average only over classes with nonzero
/// ground-truth support; classes never seen in the window do not drag the
/// means toward zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationScores {
    /// Overall pixel accuracy: trace / total
    pub overall_acc: f64,

    /// Unweighted mean of per-class accuracies over supported classes
    pub mean_acc: f64,

    /// Frequency-weighted accuracy: per-class IoU weighted by class frequency
    pub freq_weighted_acc: f64,

    /// Unweighted mean of per-class IoU over supported classes
    pub mean_iou: f64,

    /// Per-class intersection-over-union, keyed by class index
    pub class_iou: BTreeMap<usize, f64>,
}

impl SegmentationScores {
    /// Named scalar metrics, in logging order
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("Overall_Acc", self.overall_acc),
            ("Mean_Acc", self.mean_acc),
            ("FreqW_Acc", self.freq_weighted_acc),
            ("Mean_IoU", self.mean_iou),
        ]
    }
}

impl RunningConfusion {
    /// Create a zeroed confusion matrix with the default ignore label
    pub fn new(n_classes: usize) -> Result<Self> {
        Self::with_ignore_label(n_classes, DEFAULT_IGNORE_LABEL)
    }

    /// Create a zeroed confusion matrix with an explicit ignore label
    pub fn with_ignore_label(n_classes: usize, ignore_label: u32) -> Result<Self> {
        if n_classes == 0 {
            return Err(Error::metrics("number of classes must be positive"));
        }
        if (ignore_label as usize) < n_classes {
            return Err(Error::metrics(format!(
                "ignore label {} collides with class range 0..{}",
                ignore_label, n_classes
            )));
        }
        Ok(Self {
            n_classes,
            ignore_label,
            matrix: Array2::zeros((n_classes, n_classes)),
        })
    }

    /// Number of classes
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// View of the accumulated matrix
    pub fn matrix(&self) -> ArrayView2<'_, u64> {
        self.matrix.view()
    }

    /// Accumulate one batch of flattened per-pixel labels
    ///
    /// `ground_truth` and `prediction` must have equal length. Pixels whose
    /// ground truth carries the ignore label are skipped. Any other label
    /// outside `[0, n_classes)` is rejected before accumulation starts, so a
    /// failed update leaves the matrix untouched. Empty batches are a no-op.
    pub fn update(&mut self, ground_truth: &[u32], prediction: &[u32]) -> Result<()> {
        if ground_truth.len() != prediction.len() {
            return Err(Error::metrics(format!(
                "batch length mismatch: {} ground-truth vs {} predicted pixels",
                ground_truth.len(),
                prediction.len()
            )));
        }

        // Validate the whole batch before touching the matrix.
        for (&gt, &pred) in ground_truth.iter().zip(prediction.iter()) {
            if gt == self.ignore_label {
                continue;
            }
            if gt as usize >= self.n_classes {
                return Err(Error::metrics(format!(
                    "ground-truth label {} out of range for {} classes",
                    gt, self.n_classes
                )));
            }
            if pred as usize >= self.n_classes {
                return Err(Error::metrics(format!(
                    "predicted label {} out of range for {} classes",
                    pred, self.n_classes
                )));
            }
        }

        for (&gt, &pred) in ground_truth.iter().zip(prediction.iter()) {
            if gt == self.ignore_label {
                continue;
            }
            self.matrix[[gt as usize, pred as usize]] += 1;
        }

        Ok(())
    }

    /// Derive scores from the accumulated matrix
    ///
    /// Pure read: calling twice without an intervening `update` returns
    /// identical results. Zero accumulated data yields all-zero scores rather
    /// than NaN.
    pub fn get_scores(&self) -> SegmentationScores {
        let total: u64 = self.matrix.sum();

        let mut class_iou = BTreeMap::new();
        let mut supported_acc_sum = 0.0;
        let mut supported_iou_sum = 0.0;
        let mut supported = 0usize;
        let mut trace = 0u64;
        let mut freq_weighted_acc = 0.0;

        for class in 0..self.n_classes {
            let diag = self.matrix[[class, class]];
            let row_sum: u64 = self.matrix.row(class).sum();
            let col_sum: u64 = self.matrix.column(class).sum();
            trace += diag;

            let union = row_sum + col_sum - diag;
            let iou = if union == 0 {
                0.0
            } else {
                diag as f64 / union as f64
            };
            class_iou.insert(class, iou);

            if row_sum > 0 {
                supported += 1;
                supported_acc_sum += diag as f64 / row_sum as f64;
                supported_iou_sum += iou;
                freq_weighted_acc += (row_sum as f64 / total as f64) * iou;
            }
        }

        let (mean_acc, mean_iou) = if supported > 0 {
            (
                supported_acc_sum / supported as f64,
                supported_iou_sum / supported as f64,
            )
        } else {
            (0.0, 0.0)
        };

        let overall_acc = if total > 0 {
            trace as f64 / total as f64
        } else {
            0.0
        };

        SegmentationScores {
            overall_acc,
            mean_acc,
            freq_weighted_acc,
            mean_iou,
            class_iou,
        }
    }

    /// Zero the matrix for the next accumulation window
    pub fn reset(&mut self) {
        self.matrix.fill(0);
    }
}
