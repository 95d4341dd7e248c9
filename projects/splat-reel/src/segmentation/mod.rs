pub mod mask;
pub mod protocol;
pub mod session;
pub mod sidecar;

use crate::error::PipelineResult;
use crate::run_artifacts::BBox;
use mask::MaskSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use session::{SegmentationSession, SessionState};
pub use sidecar::SidecarPredictor;

pub type SessionId = String;

/// What to segment. One prompt per run, attached to the seed frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    Text { text: String },
    Box { bbox: BBox },
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text { text } => write!(f, "'{text}'"),
            Self::Box { bbox } => write!(
                f,
                "box({:.3},{:.3},{:.3},{:.3})",
                bbox.x, bbox.y, bbox.w, bbox.h
            ),
        }
    }
}

/// Video segmentation model. Calls are only valid in the order enforced by
/// `SegmentationSession`; implementations do not re-check it.
pub trait SegmentationPredictor {
    fn start_session(&mut self, resource: &Path) -> PipelineResult<SessionId>;

    fn reset_session(&mut self, session: &SessionId) -> PipelineResult<()>;

    /// Returns the masks the prompt produces on `frame_index`.
    fn add_prompt(
        &mut self,
        session: &SessionId,
        frame_index: usize,
        prompt: &Prompt,
    ) -> PipelineResult<MaskSet>;

    /// Streams one mask set per decoded frame into `sink`.
    fn propagate_in_video(
        &mut self,
        session: &SessionId,
        sink: &mut dyn FnMut(usize, MaskSet) -> PipelineResult<()>,
    ) -> PipelineResult<()>;

    fn close_session(&mut self, session: &SessionId) -> PipelineResult<()>;

    /// Releases the model itself. Called once, after the last session.
    fn shutdown(&mut self) -> PipelineResult<()>;
}
