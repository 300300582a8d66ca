use crate::errors::Result;
use crate::tensor::Prediction;
use image::RgbImage;

/// Output of one inference call: the prediction record and, when requested,
/// a rendered segmentation overlay at the input resolution.
pub struct PredictionOutput {
    pub prediction: Prediction,
    pub visualization: Option<RgbImage>,
}

/// Abstraction over the panoptic prediction service.
///
/// The pipeline only ever talks to this trait, so alternate backends (ONNX
/// session, remote service, deterministic mock) substitute without touching
/// the augmentation or output code above it.
pub trait PanopticModel: Send + Sync {
    /// Run panoptic inference on one image. `visualize` controls whether a
    /// rendered overlay is produced alongside the raw prediction.
    fn predict(&self, image: &RgbImage, visualize: bool) -> Result<PredictionOutput>;

    /// Number of classes in the per-pixel probability tensor.
    fn num_classes(&self) -> usize;
}
