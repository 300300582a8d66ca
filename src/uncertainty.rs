//! Per-pixel uncertainty from class probabilities.

use ndarray::Array2;

use crate::errors::{DemoError, Result};
use crate::tensor::ProbabilityMap;

const EPS: f32 = 1e-8;

/// Normalized Shannon entropy of a per-pixel probability tensor.
///
/// Computes `-Σ_c p_c·log2(p_c + ε) / log2(C)` per pixel. With probabilities
/// in [0, 1] and C > 1 the output lies in [0, 1]: a uniform distribution
/// maps to ≈1, a one-hot distribution to ≈0. A single-class tensor would
/// divide by log2(1) = 0, so it is rejected instead of producing NaNs.
pub fn normalized_entropy(probs: &ProbabilityMap) -> Result<Array2<f32>> {
    let classes = probs.num_classes();
    if classes < 2 {
        return Err(DemoError::validation(
            "probabilities",
            format!("entropy normalization requires at least 2 classes, got {classes}"),
        ));
    }

    let view = probs.view();
    let (h, w) = probs.spatial_dims();
    let norm = (classes as f32).log2();

    let mut entropy = Array2::<f32>::zeros((h, w));
    for c in 0..classes {
        let channel = view.index_axis(ndarray::Axis(2), c);
        entropy.zip_mut_with(&channel, |e, &p| {
            *e -= p * (p + EPS).log2();
        });
    }
    entropy /= norm;
    Ok(entropy)
}
