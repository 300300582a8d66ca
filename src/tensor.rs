//! Shape-checked tensor wrappers for the prediction record.
//!
//! The prediction service hands back dense per-pixel tensors; wrapping them
//! keeps the H×W / H×W×C agreements explicit instead of re-inferred at every
//! call site.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{DemoError, Result};

/// Per-pixel class probabilities, H×W×C with values in [0, 1].
///
/// Values are not required to sum to 1 along the class axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMap(Array3<f32>);

/// Per-pixel prediction confidence, H×W.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMap(Array2<f32>);

/// Intermediate backbone features, H×W×D.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMap(Array3<f32>);

impl ProbabilityMap {
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (h, w, c) = data.dim();
        if h == 0 || w == 0 || c == 0 {
            return Err(DemoError::validation(
                "probabilities",
                format!("expected non-empty H×W×C tensor, got {h}×{w}×{c}"),
            ));
        }
        Ok(Self(data))
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    pub fn num_classes(&self) -> usize {
        self.0.dim().2
    }

    pub fn spatial_dims(&self) -> (usize, usize) {
        let (h, w, _) = self.0.dim();
        (h, w)
    }

    /// Mirror along the width axis, undoing a horizontal flip of the input.
    pub fn fliplr(&self) -> Self {
        Self(fliplr3(&self.0))
    }

    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        check_same_dim("probabilities", self.0.dim(), other.0.dim())?;
        self.0 += &other.0;
        Ok(())
    }

    pub fn scale(&mut self, factor: f32) {
        self.0 *= factor;
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.0
    }
}

impl ConfidenceMap {
    pub fn new(data: Array2<f32>) -> Result<Self> {
        let (h, w) = data.dim();
        if h == 0 || w == 0 {
            return Err(DemoError::validation(
                "confidences",
                format!("expected non-empty H×W tensor, got {h}×{w}"),
            ));
        }
        Ok(Self(data))
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }

    pub fn fliplr(&self) -> Self {
        let mut flipped = self.0.clone();
        flipped.invert_axis(Axis(1));
        Self(flipped)
    }

    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        if self.0.dim() != other.0.dim() {
            let (h, w) = other.0.dim();
            return Err(DemoError::validation(
                "confidences",
                format!(
                    "accumulation dimension mismatch: {:?} vs {h}×{w}",
                    self.0.dim()
                ),
            ));
        }
        self.0 += &other.0;
        Ok(())
    }

    pub fn scale(&mut self, factor: f32) {
        self.0 *= factor;
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.0
    }
}

impl FeatureMap {
    pub fn new(data: Array3<f32>) -> Self {
        Self(data)
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    pub fn fliplr(&self) -> Self {
        Self(fliplr3(&self.0))
    }

    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        check_same_dim("feats", self.0.dim(), other.0.dim())?;
        self.0 += &other.0;
        Ok(())
    }

    pub fn scale(&mut self, factor: f32) {
        self.0 *= factor;
    }
}

fn fliplr3(data: &Array3<f32>) -> Array3<f32> {
    let mut flipped = data.clone();
    flipped.invert_axis(Axis(1));
    flipped
}

fn check_same_dim(
    field: &str,
    a: (usize, usize, usize),
    b: (usize, usize, usize),
) -> Result<()> {
    if a != b {
        return Err(DemoError::validation(
            field,
            format!("accumulation dimension mismatch: {a:?} vs {b:?}"),
        ));
    }
    Ok(())
}

/// Metadata for one segment in the panoptic mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: u32,
    pub category_id: u32,
    pub area: u64,
    pub score: f32,
}

/// One image's panoptic prediction: segment-id mask, segment table, dense
/// probability and confidence tensors, optional backbone features.
///
/// Created by the inference call and consumed immediately by the
/// augmentation averager and the output writer; nothing persists between
/// runs except an explicitly requested archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub mask: Array2<u32>,
    pub segments: Vec<SegmentInfo>,
    pub probabilities: ProbabilityMap,
    pub confidences: ConfidenceMap,
    pub feats: Option<FeatureMap>,
}

impl Prediction {
    /// Spatial agreement between the mask and the dense tensors.
    pub fn validate_shapes(&self) -> Result<()> {
        let mask_dim = self.mask.dim();
        if self.probabilities.spatial_dims() != mask_dim {
            return Err(DemoError::validation(
                "prediction",
                format!(
                    "probability tensor {:?} does not match mask {:?}",
                    self.probabilities.spatial_dims(),
                    mask_dim
                ),
            ));
        }
        if self.confidences.view().dim() != mask_dim {
            return Err(DemoError::validation(
                "prediction",
                format!(
                    "confidence tensor {:?} does not match mask {:?}",
                    self.confidences.view().dim(),
                    mask_dim
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn probability_map_rejects_empty() {
        assert!(ProbabilityMap::new(Array3::zeros((0, 4, 2))).is_err());
        assert!(ProbabilityMap::new(Array3::zeros((4, 4, 0))).is_err());
        assert!(ProbabilityMap::new(Array3::zeros((4, 4, 2))).is_ok());
    }

    #[test]
    fn fliplr_mirrors_width_axis() {
        let probs = ProbabilityMap::new(
            Array3::from_shape_fn((2, 3, 1), |(_, x, _)| x as f32),
        )
        .unwrap();
        let flipped = probs.fliplr();
        assert_eq!(flipped.view()[[0, 0, 0]], 2.0);
        assert_eq!(flipped.view()[[0, 2, 0]], 0.0);
        // involution
        assert_eq!(flipped.fliplr(), probs);
    }

    #[test]
    fn confidence_fliplr_mirrors_rows() {
        let conf = ConfidenceMap::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
        let flipped = conf.fliplr();
        assert_eq!(flipped.view()[[0, 0]], 3.0);
        assert_eq!(flipped.view()[[1, 2]], 4.0);
    }

    #[test]
    fn accumulate_requires_matching_dims() {
        let mut a = ConfidenceMap::new(Array2::zeros((2, 2))).unwrap();
        let b = ConfidenceMap::new(Array2::ones((2, 3))).unwrap();
        assert!(a.accumulate(&b).is_err());

        let c = ConfidenceMap::new(Array2::ones((2, 2))).unwrap();
        a.accumulate(&c).unwrap();
        a.scale(0.5);
        assert_eq!(a.view()[[0, 0]], 0.5);
    }

    #[test]
    fn prediction_shape_agreement() {
        let prediction = Prediction {
            mask: Array2::zeros((2, 2)),
            segments: vec![],
            probabilities: ProbabilityMap::new(Array3::zeros((2, 2, 3))).unwrap(),
            confidences: ConfidenceMap::new(Array2::zeros((2, 3))).unwrap(),
            feats: None,
        };
        assert!(prediction.validate_shapes().is_err());
    }
}
