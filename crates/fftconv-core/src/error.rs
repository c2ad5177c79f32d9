use thiserror::Error;

use crate::shape::Shape;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to load kernel {entry} from {unit}: {reason}")]
    ResourceAcquisition {
        unit: String,
        entry: String,
        reason: String,
    },

    #[error("compute context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("shape mismatch: expected extent {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("device dispatch failed: {0}")]
    Dispatch(String),

    #[error("stage is not ready: {0}")]
    NotReady(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported transform extent {width}x{height}: {reason}")]
    UnsupportedExtent {
        width: usize,
        height: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image format error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, StageError>;
