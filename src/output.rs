//! Output writers: visualization files, uncertainty composites, and the
//! compressed raw-prediction archive.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use image::RgbImage;
use ndarray::ArrayView2;

use crate::errors::{DemoError, Result};
use crate::heatmap::{self, Normalization};
use crate::tensor::Prediction;

/// Resolve the output path for one input file.
///
/// A directory output joins the input's basename; a single-file output is
/// only valid when exactly one input was given.
pub fn resolve_output(output: &Path, input: &Path, input_count: usize) -> Result<PathBuf> {
    if output.is_dir() {
        let basename = input.file_name().ok_or_else(|| {
            DemoError::validation("input", format!("{} has no file name", input.display()))
        })?;
        return Ok(output.join(basename));
    }
    if input_count > 1 {
        return Err(DemoError::validation(
            "--output",
            "must be a directory when multiple inputs are given",
        ));
    }
    Ok(output.to_path_buf())
}

pub fn save_visualization(visualization: &RgbImage, path: &Path) -> Result<()> {
    visualization
        .save(path)
        .map_err(|e| DemoError::ImageProcessing {
            path: path.display().to_string(),
            operation: "visualization save".to_string(),
            source: Box::new(e),
        })
}

/// Overwrite the visualization file with the composite strip
/// (visualization | certainty heat-map | confidence heat-map).
///
/// The entropy panel is inverted so high-certainty regions glow warm, the
/// same reading as the confidence panel.
pub fn save_composite(
    path: &Path,
    visualization: &RgbImage,
    entropy: ArrayView2<'_, f32>,
    confidences: ArrayView2<'_, f32>,
) -> Result<()> {
    let certainty = entropy.mapv(|e| 1.0 - e);
    let certainty_panel = heatmap::render(certainty.view(), Normalization::default());
    let confidence_panel = heatmap::render(confidences, Normalization::default());

    let strip = heatmap::composite_strip(&[visualization, &certainty_panel, &confidence_panel]);
    strip.save(path).map_err(|e| DemoError::ImageProcessing {
        path: path.display().to_string(),
        operation: "composite save".to_string(),
        source: Box::new(e),
    })
}

/// Archive path next to the visualization: same stem, `.ptz` suffix.
pub fn archive_path(visualization_path: &Path) -> PathBuf {
    visualization_path.with_extension("ptz")
}

/// Write the raw prediction record as gzip-compressed bincode.
pub fn write_archive(path: &Path, prediction: &Prediction) -> Result<()> {
    let file = File::create(path).map_err(|e| DemoError::FileSystem {
        path: path.to_path_buf(),
        operation: "archive create".to_string(),
        source: e,
    })?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    bincode::serialize_into(&mut encoder, prediction)?;
    encoder.finish().map_err(|e| DemoError::FileSystem {
        path: path.to_path_buf(),
        operation: "archive flush".to_string(),
        source: e,
    })?;
    Ok(())
}

/// Read a prediction record back from a `.ptz` archive.
pub fn read_archive(path: &Path) -> Result<Prediction> {
    let file = File::open(path).map_err(|e| DemoError::FileSystem {
        path: path.to_path_buf(),
        operation: "archive open".to_string(),
        source: e,
    })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let prediction = bincode::deserialize_from(decoder)?;
    Ok(prediction)
}
