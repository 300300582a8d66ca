//! Test-time augmentation descriptors.
//!
//! The set is a fixed, ordered 12-item list: 7 base transforms plus 5 fixed
//! pairwise compositions. Every parameter is a constant so repeated runs
//! over the same image produce identical augmented copies. The horizontal
//! flip is the only geometric member; everything else is photometric.

use image::{imageops, GrayImage, Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::{filter3x3, median_filter};

/// One stateless image transform from the fixed augmentation list.
#[derive(Debug, Clone, PartialEq)]
pub enum Augmentation {
    HorizontalFlip,
    RgbShift { r: i16, g: i16, b: i16 },
    EqualizeHist,
    Gamma { gamma: f32 },
    BrightnessContrast { brightness: i32, contrast: f32 },
    MedianBlur { radius: u32 },
    Sharpen,
    /// Applies the first transform, then the second.
    Compose(Box<Augmentation>, Box<Augmentation>),
}

impl Augmentation {
    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        match self {
            Self::HorizontalFlip => imageops::flip_horizontal(image),
            Self::RgbShift { r, g, b } => shift_channels(image, [*r, *g, *b]),
            Self::EqualizeHist => equalize_channels(image),
            Self::Gamma { gamma } => apply_gamma(image, *gamma),
            Self::BrightnessContrast {
                brightness,
                contrast,
            } => {
                let brightened = imageops::brighten(image, *brightness);
                imageops::contrast(&brightened, *contrast)
            }
            Self::MedianBlur { radius } => median_filter(image, *radius, *radius),
            Self::Sharpen => {
                // standard 4-neighbour sharpening kernel
                filter3x3(image, &[0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0])
            }
            Self::Compose(first, second) => second.apply(&first.apply(image)),
        }
    }

    /// Whether undoing this transform requires a geometric correction of
    /// the prediction tensors.
    pub fn is_geometric(&self) -> bool {
        match self {
            Self::HorizontalFlip => true,
            Self::Compose(first, second) => first.is_geometric() || second.is_geometric(),
            _ => false,
        }
    }
}

/// The fixed 12-item augmentation list used for test-time averaging.
///
/// Order matters: the averager mirror-corrects the tensors of the first
/// entry (the flip) and accumulates the rest as-is.
pub fn default_augmentation_set() -> Vec<Augmentation> {
    let base = [
        Augmentation::HorizontalFlip,
        Augmentation::RgbShift { r: 12, g: -8, b: 6 },
        Augmentation::EqualizeHist,
        Augmentation::Gamma { gamma: 1.2 },
        Augmentation::BrightnessContrast {
            brightness: 12,
            contrast: 10.0,
        },
        Augmentation::MedianBlur { radius: 3 },
        Augmentation::Sharpen,
    ];

    let mut augmentations: Vec<Augmentation> = base.to_vec();
    for (a, b) in [(1, 2), (2, 3), (1, 3), (2, 4), (5, 6)] {
        augmentations.push(Augmentation::Compose(
            Box::new(base[a].clone()),
            Box::new(base[b].clone()),
        ));
    }
    augmentations
}

fn shift_channels(image: &RgbImage, offsets: [i16; 3]) -> RgbImage {
    let mut shifted = image.clone();
    for pixel in shifted.pixels_mut() {
        let Rgb(channels) = *pixel;
        let mut out = [0u8; 3];
        for (i, &value) in channels.iter().enumerate() {
            out[i] = (i16::from(value) + offsets[i]).clamp(0, 255) as u8;
        }
        *pixel = Rgb(out);
    }
    shifted
}

/// Histogram equalization applied per channel, standing in for CLAHE.
fn equalize_channels(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut channels = Vec::with_capacity(3);
    for c in 0..3 {
        let gray = GrayImage::from_fn(width, height, |x, y| {
            image::Luma([image.get_pixel(x, y)[c]])
        });
        channels.push(equalize_histogram(&gray));
    }
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            channels[0].get_pixel(x, y)[0],
            channels[1].get_pixel(x, y)[0],
            channels[2].get_pixel(x, y)[0],
        ])
    })
}

fn apply_gamma(image: &RgbImage, gamma: f32) -> RgbImage {
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let normalized = i as f32 / 255.0;
        *entry = (normalized.powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = lut[usize::from(*channel)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image() -> RgbImage {
        RgbImage::from_fn(8, 4, |x, y| Rgb([(x * 30) as u8, (y * 60) as u8, 128]))
    }

    #[test]
    fn default_set_has_twelve_entries_flip_first() {
        let augmentations = default_augmentation_set();
        assert_eq!(augmentations.len(), 12);
        assert_eq!(augmentations[0], Augmentation::HorizontalFlip);
        // only the flip itself is geometric
        let geometric: Vec<_> = augmentations.iter().filter(|a| a.is_geometric()).collect();
        assert_eq!(geometric.len(), 1);
    }

    #[test]
    fn flip_is_an_involution() {
        let image = gradient_image();
        let flip = Augmentation::HorizontalFlip;
        assert_eq!(flip.apply(&flip.apply(&image)), image);
    }

    #[test]
    fn transforms_are_deterministic() {
        let image = gradient_image();
        for augmentation in default_augmentation_set() {
            let a = augmentation.apply(&image);
            let b = augmentation.apply(&image);
            assert_eq!(a, b, "{augmentation:?} not deterministic");
        }
    }

    #[test]
    fn rgb_shift_clamps_at_bounds() {
        let image = RgbImage::from_pixel(2, 2, Rgb([250, 3, 100]));
        let shifted = Augmentation::RgbShift { r: 12, g: -8, b: 6 }.apply(&image);
        assert_eq!(*shifted.get_pixel(0, 0), Rgb([255, 0, 106]));
    }

    #[test]
    fn compose_applies_in_order() {
        let image = gradient_image();
        let composed = Augmentation::Compose(
            Box::new(Augmentation::Gamma { gamma: 1.2 }),
            Box::new(Augmentation::HorizontalFlip),
        );
        let expected = Augmentation::HorizontalFlip
            .apply(&Augmentation::Gamma { gamma: 1.2 }.apply(&image));
        assert_eq!(composed.apply(&image), expected);
    }
}
