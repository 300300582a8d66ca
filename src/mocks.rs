//! Deterministic mock backend for tests.

use image::RgbImage;
use ndarray::{Array2, Array3};

use crate::errors::Result;
use crate::heatmap;
use crate::tensor::{ConfidenceMap, FeatureMap, Prediction, ProbabilityMap, SegmentInfo};
use crate::traits::{PanopticModel, PredictionOutput};

/// Mock prediction service whose tensors are pure functions of pixel
/// values. Flipping the input therefore flips the output tensors, which is
/// what the averager's geometric correction tests rely on.
#[derive(Debug, Clone)]
pub struct MockPanopticModel {
    pub num_classes: usize,
}

impl MockPanopticModel {
    pub const fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    fn luminance(pixel: &image::Rgb<u8>) -> f32 {
        let [r, g, b] = pixel.0;
        (u32::from(r) + u32::from(g) + u32::from(b)) as f32 / (3.0 * 255.0)
    }

    fn category_of(&self, luminance: f32) -> usize {
        ((luminance * self.num_classes as f32) as usize).min(self.num_classes - 1)
    }
}

impl PanopticModel for MockPanopticModel {
    fn predict(&self, image: &RgbImage, visualize: bool) -> Result<PredictionOutput> {
        let (width, height) = image.dimensions();
        let (h, w) = (height as usize, width as usize);

        let mut probabilities = Array3::<f32>::zeros((h, w, self.num_classes));
        let mut confidences = Array2::<f32>::zeros((h, w));
        let mut mask = Array2::<u32>::zeros((h, w));
        let mut feats = Array3::<f32>::zeros((h, w, 2));

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let luminance = Self::luminance(pixel);
            let category = self.category_of(luminance);

            for class in 0..self.num_classes {
                probabilities[[y, x, class]] = if class == category {
                    0.5 + 0.5 * luminance
                } else {
                    0.25 * luminance
                };
            }
            confidences[[y, x]] = 0.5 + 0.5 * luminance;
            mask[[y, x]] = category as u32 + 1;
            feats[[y, x, 0]] = luminance;
            feats[[y, x, 1]] = 1.0 - luminance;
        }

        let mut segments = Vec::new();
        for category in 0..self.num_classes {
            let id = category as u32 + 1;
            let area = mask.iter().filter(|&&value| value == id).count() as u64;
            if area > 0 {
                segments.push(SegmentInfo {
                    id,
                    category_id: category as u32,
                    area,
                    score: 1.0,
                });
            }
        }

        let visualization = visualize.then(|| {
            RgbImage::from_fn(width, height, |x, y| {
                let category = mask[[y as usize, x as usize]] - 1;
                heatmap::jet(category as f32 / self.num_classes as f32)
            })
        });

        Ok(PredictionOutput {
            prediction: Prediction {
                mask,
                segments,
                probabilities: ProbabilityMap::new(probabilities)?,
                confidences: ConfidenceMap::new(confidences)?,
                feats: Some(FeatureMap::new(feats)),
            },
            visualization,
        })
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn mock_prediction_shapes_agree() {
        let model = MockPanopticModel::new(4);
        let image = RgbImage::from_fn(6, 3, |x, _| Rgb([(x * 40) as u8, 0, 0]));

        let output = model.predict(&image, true).unwrap();
        let prediction = &output.prediction;
        prediction.validate_shapes().unwrap();
        assert_eq!(prediction.probabilities.num_classes(), 4);
        assert_eq!(prediction.mask.dim(), (3, 6));
        assert!(output.visualization.is_some());
        assert!(!prediction.segments.is_empty());
    }

    #[test]
    fn mock_is_flip_equivariant() {
        let model = MockPanopticModel::new(3);
        let image = RgbImage::from_fn(5, 2, |x, y| Rgb([(x * 50 + y * 10) as u8, 0, 0]));
        let flipped = image::imageops::flip_horizontal(&image);

        let base = model.predict(&image, false).unwrap().prediction;
        let flip = model.predict(&flipped, false).unwrap().prediction;

        assert_eq!(flip.probabilities.fliplr(), base.probabilities);
        assert_eq!(flip.confidences.fliplr(), base.confidences);
    }
}
