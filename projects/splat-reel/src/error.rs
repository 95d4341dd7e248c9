//! Error types shared by the pipeline stages and the player.

use std::path::PathBuf;
use thiserror::Error;

use crate::segmentation::session::SessionState;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while extracting, masking, reconstructing or playing back.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot open video source {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Invalid source frame rate: {0}")]
    InvalidSource(f64),

    #[error("Invalid target frame rate: {0}")]
    InvalidTarget(f64),

    #[error("Shape mismatch: image is {image_width}x{image_height}, mask is {mask_width}x{mask_height}")]
    ShapeMismatch {
        image_width: u32,
        image_height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("No splat artifacts found in {0}")]
    EmptySequence(PathBuf),

    #[error("Required path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Segmentation session is {state}, cannot {action}")]
    SessionState {
        state: SessionState,
        action: &'static str,
    },

    #[error("Sidecar {name} failed: {message}")]
    Sidecar { name: String, message: String },

    #[error("Invalid PLY data: {0}")]
    Ply(String),

    #[error("Invalid viewpoint: {0}")]
    InvalidViewpoint(String),

    #[error("Viewpoint selection aborted")]
    ViewAborted,

    #[error("Video recording failed: {0}")]
    Recording(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl PipelineError {
    /// Create a sidecar failure error.
    pub fn sidecar(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sidecar {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn shape_mismatch(image: (u32, u32), mask: (u32, u32)) -> Self {
        Self::ShapeMismatch {
            image_width: image.0,
            image_height: image.1,
            mask_width: mask.0,
            mask_height: mask.1,
        }
    }

    /// Errors that only concern a single frame's data and must not abort a
    /// batch. Failing to write the stage's own output is never one of them.
    pub fn is_per_frame(&self) -> bool {
        match self {
            Self::ShapeMismatch { .. } => true,
            Self::Image(e) => !matches!(e, image::ImageError::IoError(_)),
            _ => false,
        }
    }
}
