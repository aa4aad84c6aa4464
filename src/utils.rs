//! Utility functions shared across the segtrain crate

use anyhow::Result;
use std::fs;
use std::path::Path;

/// Mathematical utilities
pub mod math {
    /// Softmax over a slice of logits
    pub fn softmax(x: &[f32]) -> Vec<f32> {
        let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_values: Vec<f32> = x.iter().map(|&val| (val - max_val).exp()).collect();
        let sum: f32 = exp_values.iter().sum();
        exp_values.iter().map(|&val| val / sum).collect()
    }

    /// Log-softmax over a slice of logits, computed against the max for stability
    pub fn log_softmax(x: &[f32]) -> Vec<f32> {
        let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum: f32 = x
            .iter()
            .map(|&val| (val - max_val).exp())
            .sum::<f32>()
            .ln();
        x.iter().map(|&val| val - max_val - log_sum).collect()
    }

}

/// File I/O utilities
pub mod io {
    use super::*;

    /// Ensure directory exists
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Check if file exists and is readable
    pub fn is_file_readable<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        path.exists() && path.is_file() && fs::metadata(path).is_ok()
    }

    /// Safe file write with atomic operation
    pub fn write_file_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        fs::write(&temp_path, content)?;
        fs::rename(temp_path, path)?;

        Ok(())
    }
}

/// Configuration utilities
pub mod config {
    use super::Result;
    use serde::{Deserialize, Serialize};
    use std::path::Path;

    /// Load configuration from file
    pub fn load_config<T, P>(path: P) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        P: AsRef<Path>,
    {
        let content = std::fs::read_to_string(path.as_ref())?;

        // Try different formats based on extension
        let config = if path.as_ref().extension().map_or(false, |ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path
            .as_ref()
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            // Default to JSON
            serde_json::from_str(&content)?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_config<T, P>(config: &T, path: P) -> Result<()>
    where
        T: Serialize,
        P: AsRef<Path>,
    {
        super::io::ensure_dir_exists(path.as_ref().parent().unwrap_or(Path::new(".")))?;

        let content = if path
            .as_ref()
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml")
        {
            serde_yaml::to_string(config)?
        } else {
            serde_json::to_string_pretty(config)?
        };

        super::io::write_file_atomic(path, content.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = math::softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let logits = [0.5, -1.0, 2.0];
        let probs = math::softmax(&logits);
        let log_probs = math::log_softmax(&logits);
        for (p, lp) in probs.iter().zip(log_probs.iter()) {
            assert_relative_eq!(p.ln(), *lp, epsilon = 1e-5);
        }
    }

}
