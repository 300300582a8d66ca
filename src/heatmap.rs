//! Scalar-tensor visualization: jet colormap and composite strips.

use image::{Rgb, RgbImage};
use ndarray::ArrayView2;

/// Normalization bounds applied before colormapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// Fixed bounds, independent of the tensor's actual range.
    Global { min: f32, max: f32 },
    /// Rescale by the tensor's own min/max.
    Local,
}

impl Default for Normalization {
    fn default() -> Self {
        Self::Global { min: 0.0, max: 1.0 }
    }
}

/// Piecewise-linear "jet" colormap over [0, 1].
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let r = (1.5 - (4.0 * v - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * v - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * v - 1.0).abs()).clamp(0.0, 1.0);
    Rgb([
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ])
}

/// Render a scalar tensor as an RGB heat-map at the same resolution.
///
/// NaNs are flushed to 0 before normalization; values are rescaled as
/// `(x - min) / (max - min + 1e-8)` and passed through the jet colormap.
pub fn render(map: ArrayView2<'_, f32>, normalization: Normalization) -> RgbImage {
    let (height, width) = map.dim();

    let (min, max) = match normalization {
        Normalization::Global { min, max } => (min, max),
        Normalization::Local => {
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for &value in map.iter() {
                let v = if value.is_nan() { 0.0 } else { value };
                min = min.min(v);
                max = max.max(v);
            }
            (min, max)
        }
    };

    let range = max - min + 1e-8;
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let raw = map[[y as usize, x as usize]];
        let value = if raw.is_nan() { 0.0 } else { raw };
        jet((value - min) / range)
    })
}

/// Horizontal concatenation of equally-sized panels into one strip.
///
/// Panels must agree in height and width; the caller renders them all at
/// the input resolution so this holds by construction.
pub fn composite_strip(panels: &[&RgbImage]) -> RgbImage {
    let height = panels.first().map_or(0, |p| p.height());
    let panel_width = panels.first().map_or(0, |p| p.width());
    let mut strip = RgbImage::new(panel_width * panels.len() as u32, height);
    for (index, panel) in panels.iter().enumerate() {
        let x_offset = index as u32 * panel_width;
        for (x, y, pixel) in panel.enumerate_pixels() {
            strip.put_pixel(x_offset + x, y, *pixel);
        }
    }
    strip
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn jet_endpoints() {
        // low end is deep blue, high end deep red
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
        // midpoint is green-dominant
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
    }

    #[test]
    fn global_normalization_ignores_tensor_range() {
        // tensor spans [0.2, 0.8] but bounds are fixed at [0, 1]
        let map = array![[0.0, 1.0], [0.2, 0.8]];
        let rendered = render(map.view(), Normalization::default());
        assert_eq!(*rendered.get_pixel(0, 0), jet(0.0));
        assert_eq!(*rendered.get_pixel(1, 0), jet(1.0));
    }

    #[test]
    fn local_normalization_rescales_to_full_range() {
        let map = array![[0.4, 0.6]];
        let rendered = render(map.view(), Normalization::Local);
        assert_eq!(*rendered.get_pixel(0, 0), jet(0.0));
        // 1e-8 guard keeps the top just below 1.0
        let top = rendered.get_pixel(1, 0);
        let expected = jet((0.6 - 0.4) / (0.6 - 0.4 + 1e-8));
        assert_eq!(*top, expected);
    }

    #[test]
    fn nan_values_render_as_zero() {
        let map = array![[f32::NAN, 1.0]];
        let rendered = render(map.view(), Normalization::default());
        assert_eq!(*rendered.get_pixel(0, 0), jet(0.0));
    }

    #[test]
    fn composite_concatenates_horizontally() {
        let red = RgbImage::from_pixel(2, 3, Rgb([255, 0, 0]));
        let blue = RgbImage::from_pixel(2, 3, Rgb([0, 0, 255]));
        let strip = composite_strip(&[&red, &blue]);
        assert_eq!(strip.dimensions(), (4, 3));
        assert_eq!(*strip.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*strip.get_pixel(2, 0), Rgb([0, 0, 255]));
    }
}
