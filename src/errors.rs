use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the panoptic demo.
///
/// Each variant captures context specific to its error domain (filesystem,
/// image processing, model inference, video I/O, ...) so callers get usable
/// diagnostics without parsing error strings. Precondition violations are
/// reported through `Validation` before any I/O happens; nothing in the
/// pipeline silently skips a file.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Video error: {operation} failed")]
    Video {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {operation} failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DemoError>;

impl DemoError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for DemoError {
    fn from(err: anyhow::Error) -> Self {
        DemoError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Fallback for I/O errors without path/operation context. Code that has
/// context should construct `DemoError::FileSystem` directly.
impl From<std::io::Error> for DemoError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for DemoError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for DemoError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors happen during tensor plumbing, which is part of inference,
/// so they stay in the model category.
impl From<ndarray::ShapeError> for DemoError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<opencv::Error> for DemoError {
    fn from(err: opencv::Error) -> Self {
        Self::Video {
            operation: "opencv operation".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for DemoError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("model settings parse failed: {err}"),
        }
    }
}

impl From<bincode::Error> for DemoError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization {
            operation: "prediction encoding".to_string(),
            source: err,
        }
    }
}
