//! Test-time augmentation: prediction averaging and segment cluster merging.

use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Axis};

use crate::augment::Augmentation;
use crate::errors::{DemoError, Result};
use crate::traits::{PanopticModel, PredictionOutput};

/// Runs inference once on the raw image and once per augmentation, then
/// averages the probability, confidence and feature tensors.
///
/// Only the first augmentation (the horizontal flip) has its tensors
/// mirrored back before accumulation; the remaining entries are photometric
/// and accumulate without geometric correction. The returned prediction is
/// the unaugmented one with its dense tensors replaced by the averages.
pub fn averaged_prediction<M: PanopticModel>(
    model: &M,
    image: &RgbImage,
    augmentations: &[Augmentation],
    visualize: bool,
) -> Result<PredictionOutput> {
    if augmentations.is_empty() {
        return Err(DemoError::validation(
            "augmentations",
            "averaging requires a non-empty augmentation list",
        ));
    }

    let PredictionOutput {
        mut prediction,
        visualization,
    } = model.predict(image, visualize)?;

    let mut probabilities = prediction.probabilities.clone();
    let mut confidences = prediction.confidences.clone();
    let mut feats = prediction.feats.clone();

    for (index, augmentation) in augmentations.iter().enumerate() {
        let transformed = augmentation.apply(image);
        let augmented = model.predict(&transformed, false)?.prediction;

        // index 0 is the flip; mirror its tensors back before accumulating
        let (aug_probs, aug_conf, aug_feats) = if index == 0 {
            (
                augmented.probabilities.fliplr(),
                augmented.confidences.fliplr(),
                augmented.feats.as_ref().map(|f| f.fliplr()),
            )
        } else {
            (
                augmented.probabilities,
                augmented.confidences,
                augmented.feats,
            )
        };

        probabilities.accumulate(&aug_probs)?;
        confidences.accumulate(&aug_conf)?;
        if let (Some(acc), Some(aug)) = (feats.as_mut(), aug_feats.as_ref()) {
            acc.accumulate(aug)?;
        }
    }

    let factor = 1.0 / (augmentations.len() + 1) as f32;
    probabilities.scale(factor);
    confidences.scale(factor);
    if let Some(acc) = feats.as_mut() {
        acc.scale(factor);
    }

    prediction.probabilities = probabilities;
    prediction.confidences = confidences;
    prediction.feats = feats;

    Ok(PredictionOutput {
        prediction,
        visualization,
    })
}

/// Soft IoU between two soft masks: element-wise min-sum over max-sum.
pub fn soft_iou(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    let mut min_sum = 0.0f32;
    let mut max_sum = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        min_sum += x.min(y);
        max_sum += x.max(y);
    }
    if max_sum == 0.0 {
        0.0
    } else {
        min_sum / max_sum
    }
}

/// Merges per-segment soft masks and probability vectors collected across
/// augmented runs: segments whose pairwise soft IoU meets the threshold are
/// linked, connected components are clustered, and each cluster's mask and
/// probability vector is the average of its members.
pub struct SegmentClusters {
    pub probabilities: Vec<Array1<f32>>,
    pub masks: Vec<Array2<f32>>,
}

impl SegmentClusters {
    pub fn merge(
        segment_probabilities: &[Array1<f32>],
        segment_masks: &[Array2<f32>],
        iou_threshold: f32,
    ) -> Result<Self> {
        if segment_probabilities.len() != segment_masks.len() {
            return Err(DemoError::validation(
                "segments",
                format!(
                    "probability and mask counts differ: {} vs {}",
                    segment_probabilities.len(),
                    segment_masks.len()
                ),
            ));
        }
        let count = segment_masks.len();
        if count == 0 {
            return Ok(Self {
                probabilities: vec![],
                masks: vec![],
            });
        }

        let mut components = UnionFind::new(count);
        for i in 0..count {
            for j in (i + 1)..count {
                if soft_iou(&segment_masks[i], &segment_masks[j]) >= iou_threshold {
                    components.union(i, j);
                }
            }
        }

        // root -> cluster slot, preserving first-seen order
        let mut slots: Vec<usize> = Vec::new();
        let mut slot_of_root = vec![usize::MAX; count];
        let mut sums_probs: Vec<Array1<f32>> = Vec::new();
        let mut sums_masks: Vec<Array2<f32>> = Vec::new();
        let mut member_counts: Vec<usize> = Vec::new();

        for index in 0..count {
            let root = components.find(index);
            let slot = if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = slots.len();
                slots.push(root);
                sums_probs.push(Array1::zeros(segment_probabilities[index].dim()));
                sums_masks.push(Array2::zeros(segment_masks[index].dim()));
                member_counts.push(0);
                slots.len() - 1
            } else {
                slot_of_root[root]
            };

            sums_probs[slot] += &segment_probabilities[index];
            sums_masks[slot] += &segment_masks[index];
            member_counts[slot] += 1;
        }

        for (slot, members) in member_counts.iter().enumerate() {
            let factor = 1.0 / *members as f32;
            sums_probs[slot] *= factor;
            sums_masks[slot] *= factor;
        }

        Ok(Self {
            probabilities: sums_probs,
            masks: sums_masks,
        })
    }

    /// Clusters stacked along a leading axis.
    pub fn stacked_masks(&self) -> Result<Array3<f32>> {
        let views: Vec<_> = self.masks.iter().map(Array2::view).collect();
        ndarray::stack(Axis(0), &views).map_err(Into::into)
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::{default_augmentation_set, Augmentation};
    use crate::mocks::MockPanopticModel;
    use image::Rgb;
    use ndarray::array;

    fn gradient_image() -> RgbImage {
        RgbImage::from_fn(6, 4, |x, y| Rgb([(x * 40) as u8, (y * 60) as u8, 90]))
    }

    #[test]
    fn averaging_is_deterministic() {
        let model = MockPanopticModel::new(4);
        let image = gradient_image();
        let augmentations = default_augmentation_set();

        let first = averaged_prediction(&model, &image, &augmentations, false).unwrap();
        let second = averaged_prediction(&model, &image, &augmentations, false).unwrap();
        assert_eq!(
            first.prediction.probabilities,
            second.prediction.probabilities
        );
        assert_eq!(first.prediction.confidences, second.prediction.confidences);
        assert_eq!(first.prediction.feats, second.prediction.feats);
    }

    #[test]
    fn flip_correction_restores_orientation() {
        // the mock is flip-equivariant, so the mirrored-back flip run must
        // reproduce the base tensors and the two-run average equals them
        let model = MockPanopticModel::new(3);
        let image = gradient_image();
        let augmentations = vec![Augmentation::HorizontalFlip];

        let base = model.predict(&image, false).unwrap().prediction;
        let averaged = averaged_prediction(&model, &image, &augmentations, false)
            .unwrap()
            .prediction;
        assert_eq!(averaged.probabilities, base.probabilities);
        assert_eq!(averaged.confidences, base.confidences);
    }

    #[test]
    fn empty_augmentation_list_is_rejected() {
        let model = MockPanopticModel::new(2);
        let image = gradient_image();
        assert!(averaged_prediction(&model, &image, &[], false).is_err());
    }

    #[test]
    fn visualization_comes_from_the_unaugmented_run() {
        let model = MockPanopticModel::new(2);
        let image = gradient_image();
        let augmentations = vec![Augmentation::HorizontalFlip];

        let output = averaged_prediction(&model, &image, &augmentations, true).unwrap();
        let base = model.predict(&image, true).unwrap();
        assert_eq!(output.visualization, base.visualization);
    }

    #[test]
    fn soft_iou_of_identical_masks_is_one() {
        let mask = array![[0.5, 1.0], [0.0, 0.25]];
        assert!((soft_iou(&mask, &mask) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn soft_iou_of_disjoint_masks_is_zero() {
        let a = array![[1.0, 0.0], [1.0, 0.0]];
        let b = array![[0.0, 1.0], [0.0, 1.0]];
        assert_eq!(soft_iou(&a, &b), 0.0);
    }

    #[test]
    fn overlapping_segments_merge_into_averaged_cluster() {
        let masks = vec![
            array![[1.0, 1.0], [0.0, 0.0]],
            array![[1.0, 0.8], [0.0, 0.0]],
            array![[0.0, 0.0], [1.0, 1.0]],
        ];
        let probabilities = vec![
            array![0.8, 0.2],
            array![0.6, 0.4],
            array![0.1, 0.9],
        ];

        let clusters = SegmentClusters::merge(&probabilities, &masks, 0.5).unwrap();
        assert_eq!(clusters.masks.len(), 2);

        // first cluster averages the two overlapping segments
        let merged = &clusters.masks[0];
        assert!((merged[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((merged[[0, 1]] - 0.9).abs() < 1e-6);
        assert!((clusters.probabilities[0][0] - 0.7).abs() < 1e-6);

        // disjoint segment stays its own cluster
        assert_eq!(clusters.masks[1], masks[2]);
        assert_eq!(clusters.probabilities[1], probabilities[2]);
    }

    #[test]
    fn below_threshold_segments_stay_separate() {
        let masks = vec![
            array![[1.0, 0.0], [0.0, 0.0]],
            array![[1.0, 1.0], [1.0, 1.0]],
        ];
        let probabilities = vec![array![1.0], array![0.5]];

        // IoU = 1/4, below the 0.5 threshold
        let clusters = SegmentClusters::merge(&probabilities, &masks, 0.5).unwrap();
        assert_eq!(clusters.masks.len(), 2);

        let stacked = clusters.stacked_masks().unwrap();
        assert_eq!(stacked.dim(), (2, 2, 2));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let masks = vec![array![[1.0]]];
        assert!(SegmentClusters::merge(&[], &masks, 0.5).is_err());
    }
}
