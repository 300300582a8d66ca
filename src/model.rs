//! ONNX-backed panoptic prediction service.

use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::{s, Array2, Array3, Array4, ArrayView4, Axis, Ix4, NewAxis};
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::config::ModelSettings;
use crate::errors::{DemoError, Result};
use crate::heatmap;
use crate::tensor::{ConfidenceMap, FeatureMap, Prediction, ProbabilityMap, SegmentInfo};
use crate::traits::{PanopticModel, PredictionOutput};

/// Panoptic segmentation backend driving an ONNX session.
///
/// The graph takes a `1×3×S×S` BGR float input named `img` and returns
/// per-pixel class scores named `probs` (`1×C×S×S`) plus, optionally, a
/// backbone feature map named `feats` (`1×D×h×w`).
pub struct OnnxPanopticModel {
    settings: ModelSettings,
    confidence_threshold: f32,
    has_feats: bool,
    session: Mutex<Session>,
}

impl OnnxPanopticModel {
    pub fn new(settings: ModelSettings, confidence_threshold: f32) -> Result<Self> {
        let session = SessionBuilder::new()
            .map_err(|e| DemoError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(settings.device_id)
                    .build(),
            ])
            .map_err(|e| DemoError::Model {
                operation: "execution provider setup".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| DemoError::Model {
                operation: "memory pattern setup".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(&settings.weights)
            .map_err(|e| DemoError::Model {
                operation: format!("model load: {}", settings.weights.display()),
                source: Box::new(e),
            })?;

        let has_feats = session.outputs.iter().any(|output| output.name == "feats");

        Ok(Self {
            settings,
            confidence_threshold,
            has_feats,
            session: Mutex::new(session),
        })
    }

    /// Resize to the network resolution, reverse channels to BGR, scale to
    /// [0, 1] and add the batch axis.
    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.settings.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Lanczos3);
        let tensor = resized.as_ndarray3().slice_move(s![NewAxis, ..;-1, .., ..]);
        tensor.map(|&v| f32::from(v) / 255.0)
    }

    fn infer(&self, tensor: ArrayView4<'_, f32>) -> Result<(Array4<f32>, Option<Array4<f32>>)> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs!["img" => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;

        let probs = outputs["probs"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let feats = if self.has_feats {
            Some(
                outputs["feats"]
                    .try_extract_array::<f32>()?
                    .into_dimensionality::<Ix4>()?
                    .to_owned(),
            )
        } else {
            None
        };
        Ok((probs, feats))
    }

    /// Upsample the `1×C×S×S` network output to an H×W×C probability map at
    /// the input resolution.
    fn upsample_probs(&self, probs: &Array4<f32>, width: u32, height: u32) -> Result<Array3<f32>> {
        let classes = probs.dim().1;
        let size = self.settings.input_size;
        let mut upsampled = Array3::<f32>::zeros((height as usize, width as usize, classes));

        for class in 0..classes {
            let channel = probs.slice(s![0, class, .., ..]);
            let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
                ImageBuffer::from_raw(size, size, channel.iter().copied().collect()).ok_or_else(
                    || {
                        DemoError::validation(
                            "probs",
                            format!("network output is not {size}×{size}"),
                        )
                    },
                )?;
            let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
            for (x, y, Luma([value])) in resized.enumerate_pixels() {
                upsampled[[y as usize, x as usize, class]] = value.clamp(0.0, 1.0);
            }
        }
        Ok(upsampled)
    }

    /// Argmax mask + per-category segment table. Segments whose mean
    /// confidence falls below the threshold are dropped and their pixels
    /// voided.
    fn extract_segments(
        &self,
        probabilities: &Array3<f32>,
    ) -> (Array2<u32>, Array2<f32>, Vec<SegmentInfo>) {
        let (height, width, classes) = probabilities.dim();
        let mut mask = Array2::<u32>::zeros((height, width));
        let mut confidences = Array2::<f32>::zeros((height, width));
        let mut areas = vec![0u64; classes];
        let mut score_sums = vec![0f64; classes];

        for y in 0..height {
            for x in 0..width {
                let pixel = probabilities.slice(s![y, x, ..]);
                let (category, &confidence) = pixel
                    .iter()
                    .enumerate()
                    .max_by(|x, y| x.1.total_cmp(y.1))
                    .unwrap_or((0, &0.0));
                mask[[y, x]] = category as u32 + 1;
                confidences[[y, x]] = confidence;
                areas[category] += 1;
                score_sums[category] += f64::from(confidence);
            }
        }

        let mut segments = Vec::new();
        for category in 0..classes {
            if areas[category] == 0 {
                continue;
            }
            let id = category as u32 + 1;
            let score = (score_sums[category] / areas[category] as f64) as f32;
            if score < self.confidence_threshold {
                mask.mapv_inplace(|value| if value == id { 0 } else { value });
                continue;
            }
            segments.push(SegmentInfo {
                id,
                category_id: category as u32,
                area: areas[category],
                score,
            });
        }
        (mask, confidences, segments)
    }

    fn render_overlay(&self, image: &RgbImage, mask: &Array2<u32>) -> RgbImage {
        let classes = self.settings.num_classes.max(1) as f32;
        RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let pixel = image.get_pixel(x, y);
            let id = mask[[y as usize, x as usize]];
            if id == 0 {
                return *pixel;
            }
            let Rgb(color) = heatmap::jet((id - 1) as f32 / classes);
            Rgb([
                ((u16::from(pixel[0]) + u16::from(color[0])) / 2) as u8,
                ((u16::from(pixel[1]) + u16::from(color[1])) / 2) as u8,
                ((u16::from(pixel[2]) + u16::from(color[2])) / 2) as u8,
            ])
        })
    }
}

impl PanopticModel for OnnxPanopticModel {
    fn predict(&self, image: &RgbImage, visualize: bool) -> Result<PredictionOutput> {
        let (width, height) = image.dimensions();
        let tensor = self.preprocess(image);
        let (raw_probs, raw_feats) = self.infer(tensor.view())?;

        if raw_probs.dim().1 != self.settings.num_classes {
            return Err(DemoError::validation(
                "probs",
                format!(
                    "network reports {} classes, settings expect {}",
                    raw_probs.dim().1,
                    self.settings.num_classes
                ),
            ));
        }

        let probabilities = self.upsample_probs(&raw_probs, width, height)?;
        let (mask, confidences, segments) = self.extract_segments(&probabilities);

        let feats = raw_feats
            .map(|f| {
                // 1×D×h×w -> h×w×D at native feature resolution
                let spatial = f.index_axis_move(Axis(0), 0);
                FeatureMap::new(spatial.permuted_axes([1, 2, 0]).as_standard_layout().to_owned())
            });

        let visualization = visualize.then(|| self.render_overlay(image, &mask));

        Ok(PredictionOutput {
            prediction: Prediction {
                mask,
                segments,
                probabilities: ProbabilityMap::new(probabilities)?,
                confidences: ConfidenceMap::new(confidences)?,
                feats,
            },
            visualization,
        })
    }

    fn num_classes(&self) -> usize {
        self.settings.num_classes
    }
}
