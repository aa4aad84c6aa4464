//! Forward loss evaluation for segmentation training
//!
//! Two loss terms from the training driver: a bootstrapped cross-entropy that
//! keeps only the top-K highest-loss pixels of a batch, and a
//! semantic-encoding loss that penalizes the predicted set of classes present
//! in an image. Both are forward-only evaluations; gradient computation lives
//! in the surrounding framework and is out of scope here.

use ndarray::{Array1, ArrayView1, ArrayView2};
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::utils::math;

/// Bootstrapped pixel cross-entropy
///
/// Ranks per-pixel cross-entropy losses and averages (or sums) only the K
/// largest, emphasizing hard examples. Pixels labelled with the ignore label
/// are excluded before ranking.
#[derive(Debug, Clone)]
pub struct BootstrapCrossEntropy {
    /// Label value excluded from the loss
    ignore_label: u32,

    /// Optional per-class weights applied to pixel losses
    class_weights: Option<Array1<f32>>,

    /// Average the selected losses instead of summing them
    size_average: bool,
}

impl BootstrapCrossEntropy {
    /// Create a bootstrapped cross-entropy evaluator
    pub fn new(
        ignore_label: u32,
        class_weights: Option<Array1<f32>>,
        size_average: bool,
    ) -> Result<Self> {
        if let Some(weights) = &class_weights {
            if weights.iter().any(|&w| w <= 0.0 || !w.is_finite()) {
                return Err(Error::loss("class weights must be positive and finite"));
            }
        }
        Ok(Self {
            ignore_label,
            class_weights,
            size_average,
        })
    }

    /// Evaluate the loss over a flattened batch
    ///
    /// `logits` has one row of per-class scores per pixel; `target` holds the
    /// matching ground-truth labels. `k` is the number of hardest pixels kept,
    /// as produced by the top-k schedule. A batch whose pixels are all
    /// ignored evaluates to 0.0.
    pub fn forward(&self, logits: ArrayView2<f32>, target: &[u32], k: usize) -> Result<f32> {
        if logits.nrows() != target.len() {
            return Err(Error::loss(format!(
                "logit rows ({}) do not match target pixels ({})",
                logits.nrows(),
                target.len()
            )));
        }
        if k == 0 {
            return Err(Error::loss("top-k pixel count must be positive"));
        }
        let n_classes = logits.ncols();
        if let Some(weights) = &self.class_weights {
            if weights.len() != n_classes {
                return Err(Error::loss(format!(
                    "expected {} class weights, got {}",
                    n_classes,
                    weights.len()
                )));
            }
        }

        let mut pixel_losses = Vec::with_capacity(target.len());
        for (row, &label) in logits.outer_iter().zip(target.iter()) {
            if label == self.ignore_label {
                continue;
            }
            if label as usize >= n_classes {
                return Err(Error::loss(format!(
                    "target label {} out of range for {} classes",
                    label, n_classes
                )));
            }

            let scores: Vec<f32> = row.iter().copied().collect();
            let log_probs = math::log_softmax(&scores);
            let mut loss = -log_probs[label as usize];
            if let Some(weights) = &self.class_weights {
                loss *= weights[label as usize];
            }
            pixel_losses.push(loss);
        }

        if pixel_losses.is_empty() {
            return Ok(0.0);
        }

        pixel_losses
            .sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        pixel_losses.truncate(k);

        let sum: f32 = pixel_losses.iter().sum();
        if self.size_average {
            Ok(sum / pixel_losses.len() as f32)
        } else {
            Ok(sum)
        }
    }
}

/// Semantic-encoding loss over image-level class presence
///
/// Encodes the set of classes present in a label map as a binary vector and
/// scores predicted presence logits against it with a scaled binary
/// cross-entropy.
#[derive(Debug, Clone)]
pub struct SemanticEncodingLoss {
    /// Number of semantic classes
    n_classes: usize,

    /// Label value excluded from encoding
    ignore_label: u32,

    /// Scale applied to the mean binary cross-entropy
    alpha: f32,
}

impl SemanticEncodingLoss {
    /// Create a semantic-encoding loss evaluator
    pub fn new(n_classes: usize, ignore_label: u32, alpha: f32) -> Result<Self> {
        if n_classes == 0 {
            return Err(Error::loss("number of classes must be positive"));
        }
        if (ignore_label as usize) < n_classes {
            return Err(Error::loss(format!(
                "ignore label {} collides with class range 0..{}",
                ignore_label, n_classes
            )));
        }
        if alpha <= 0.0 || !alpha.is_finite() {
            return Err(Error::loss("alpha must be positive and finite"));
        }
        Ok(Self {
            n_classes,
            ignore_label,
            alpha,
        })
    }

    /// Encode a flattened label map as a class-presence vector
    pub fn encode_targets(&self, labels: &[u32]) -> Result<Array1<f32>> {
        let mut presence = Array1::zeros(self.n_classes);
        for &label in labels {
            if label == self.ignore_label {
                continue;
            }
            if label as usize >= self.n_classes {
                return Err(Error::loss(format!(
                    "label {} out of range for {} classes",
                    label, self.n_classes
                )));
            }
            presence[label as usize] = 1.0;
        }
        Ok(presence)
    }

    /// Scaled binary cross-entropy between presence logits and targets
    pub fn forward(&self, logits: ArrayView1<f32>, target: ArrayView1<f32>) -> Result<f32> {
        if logits.len() != self.n_classes || target.len() != self.n_classes {
            return Err(Error::loss(format!(
                "expected {} presence entries, got {} logits and {} targets",
                self.n_classes,
                logits.len(),
                target.len()
            )));
        }

        // Stable BCE-with-logits: max(x, 0) - x*t + ln(1 + exp(-|x|))
        let total: f32 = logits
            .iter()
            .zip(target.iter())
            .map(|(&x, &t)| x.max(0.0) - x * t + (1.0 + (-x.abs()).exp()).ln())
            .sum();

        Ok(self.alpha * total / self.n_classes as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_uniform_logits_give_log_n() {
        let ce = BootstrapCrossEntropy::new(250, None, true).unwrap();
        let logits = arr2(&[[0.0f32, 0.0], [0.0, 0.0]]);
        let loss = ce.forward(logits.view(), &[0, 1], 2).unwrap();
        assert_relative_eq!(loss, 2.0f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_topk_keeps_hardest_pixels() {
        let ce = BootstrapCrossEntropy::new(250, None, true).unwrap();
        // first pixel is confidently right, second is confidently wrong
        let logits = arr2(&[[8.0f32, -8.0], [8.0, -8.0]]);
        let target = [0u32, 1];

        let full = ce.forward(logits.view(), &target, 2).unwrap();
        let hardest = ce.forward(logits.view(), &target, 1).unwrap();
        assert!(hardest > full);
        // the single kept pixel is the mispredicted one
        assert!(hardest > 15.0);
    }

    #[test]
    fn test_class_weights_scale_pixel_losses() {
        let unweighted = BootstrapCrossEntropy::new(250, None, true).unwrap();
        let weighted =
            BootstrapCrossEntropy::new(250, Some(arr1(&[3.0f32, 1.0])), true).unwrap();

        let logits = arr2(&[[0.0f32, 0.0]]);
        let base = unweighted.forward(logits.view(), &[0], 1).unwrap();
        let scaled = weighted.forward(logits.view(), &[0], 1).unwrap();
        assert_relative_eq!(scaled, base * 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ignored_pixels_are_excluded() {
        let ce = BootstrapCrossEntropy::new(250, None, true).unwrap();
        let logits = arr2(&[[0.0f32, 0.0], [9.0, -9.0]]);

        let loss = ce.forward(logits.view(), &[250, 0], 2).unwrap();
        // only the confident correct pixel remains
        assert!(loss < 1e-3);

        let all_ignored = ce.forward(logits.view(), &[250, 250], 2).unwrap();
        assert_eq!(all_ignored, 0.0);
    }

    #[test]
    fn test_invalid_batches_rejected() {
        let ce = BootstrapCrossEntropy::new(250, None, true).unwrap();
        let logits = arr2(&[[0.0f32, 0.0]]);
        assert!(ce.forward(logits.view(), &[0, 1], 1).is_err());
        assert!(ce.forward(logits.view(), &[5], 1).is_err());
        assert!(ce.forward(logits.view(), &[0], 0).is_err());
    }

    #[test]
    fn test_presence_encoding() {
        let se = SemanticEncodingLoss::new(4, 250, 0.2).unwrap();
        let encoded = se.encode_targets(&[0, 0, 2, 250, 2]).unwrap();
        assert_eq!(encoded, arr1(&[1.0f32, 0.0, 1.0, 0.0]));
        assert!(se.encode_targets(&[9]).is_err());
    }

    #[test]
    fn test_bce_known_value() {
        let se = SemanticEncodingLoss::new(2, 250, 1.0).unwrap();
        let logits = arr1(&[0.0f32, 0.0]);
        let target = arr1(&[1.0f32, 0.0]);
        // sigmoid(0) = 0.5 on both entries -> mean BCE is ln 2
        let loss = se.forward(logits.view(), target.view()).unwrap();
        assert_relative_eq!(loss, 2.0f32.ln(), epsilon = 1e-6);
    }

    #[test]
    fn test_confident_presence_prediction_scores_low() {
        let se = SemanticEncodingLoss::new(3, 250, 0.2).unwrap();
        let target = se.encode_targets(&[0, 1]).unwrap();
        let good = arr1(&[10.0f32, 10.0, -10.0]);
        let bad = arr1(&[-10.0f32, -10.0, 10.0]);

        let good_loss = se.forward(good.view(), target.view()).unwrap();
        let bad_loss = se.forward(bad.view(), target.view()).unwrap();
        assert!(good_loss < 1e-3);
        assert!(bad_loss > 1.0);
    }
}
