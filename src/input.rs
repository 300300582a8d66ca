//! Input enumeration and index-modulo sharding.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::{DemoError, Result};

pub fn is_supported_image_format(path: &Path) -> bool {
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        matches!(
            extension.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "avif"
        )
    } else {
        false
    }
}

/// Enumerate the input file list in sorted order.
///
/// A single directory argument lists its supported image files; anything
/// else is taken as an explicit file list. Missing explicit files are a
/// hard error rather than a silent skip.
pub fn enumerate_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if inputs.is_empty() {
        return Err(DemoError::validation("input", "no input files given"));
    }

    let mut files = if inputs.len() == 1 && inputs[0].is_dir() {
        WalkDir::new(&inputs[0])
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file() && is_supported_image_format(e.path()))
            .map(|e| e.into_path())
            .collect::<Vec<_>>()
    } else {
        for path in inputs {
            if !path.is_file() {
                return Err(DemoError::FileSystem {
                    path: path.clone(),
                    operation: "input file check".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "input file does not exist",
                    ),
                });
            }
        }
        inputs.to_vec()
    };

    files.sort();
    Ok(files)
}

/// Keep exactly the sorted positions where `index mod n == p`.
///
/// Each of `n` cooperating processes passes its own `p`; the union over
/// `p = 0..n-1` partitions the full list. `p >= n` selects nothing and is
/// deliberately not validated here.
pub fn shard(files: Vec<PathBuf>, n: usize, p: usize) -> Vec<PathBuf> {
    files
        .into_iter()
        .enumerate()
        .filter(|(index, _)| index % n == p)
        .map(|(_, path)| path)
        .collect()
}
