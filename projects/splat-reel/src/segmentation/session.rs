// Segmentation session state machine
//
// CREATED -> PROMPTED -> PROPAGATED -> CLOSED. Any state may close; nothing is
// accepted once closed. Dropping an unclosed session closes it.

use super::mask::MaskSet;
use super::{Prompt, SegmentationPredictor, SessionId};
use crate::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Frame the prompt is attached to.
pub const SEED_FRAME: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Prompted,
    Propagated,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Prompted => "PROMPTED",
            Self::Propagated => "PROPAGATED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

pub struct SegmentationSession<'p, P: SegmentationPredictor + ?Sized> {
    predictor: &'p mut P,
    id: SessionId,
    state: SessionState,
}

impl<'p, P: SegmentationPredictor + ?Sized> SegmentationSession<'p, P> {
    /// Opens a fresh session over `resource` (a video file or frame folder).
    pub fn start(predictor: &'p mut P, resource: &Path) -> PipelineResult<Self> {
        let id = predictor.start_session(resource)?;
        let mut session = Self {
            predictor,
            id,
            state: SessionState::Created,
        };
        // The session closes itself on drop if the reset fails
        session.predictor.reset_session(&session.id)?;
        tracing::info!(
            "Segmentation session {} started for {}",
            session.id,
            resource.display()
        );
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn expect_state(&self, expected: SessionState, action: &'static str) -> PipelineResult<()> {
        if self.state != expected {
            return Err(PipelineError::SessionState {
                state: self.state,
                action,
            });
        }
        Ok(())
    }

    /// Attaches `prompt` to the seed frame and returns that frame's masks.
    pub fn prompt(&mut self, prompt: &Prompt) -> PipelineResult<MaskSet> {
        self.expect_state(SessionState::Created, "add a prompt")?;
        let masks = self.predictor.add_prompt(&self.id, SEED_FRAME, prompt)?;
        self.state = SessionState::Prompted;
        tracing::info!(
            "Prompt {} on frame {} found {} object(s)",
            prompt,
            SEED_FRAME,
            masks.len()
        );
        Ok(masks)
    }

    /// Tracks the prompted objects through every decoded frame.
    pub fn propagate(&mut self) -> PipelineResult<BTreeMap<usize, MaskSet>> {
        self.expect_state(SessionState::Prompted, "propagate")?;
        let mut per_frame = BTreeMap::new();
        self.predictor
            .propagate_in_video(&self.id, &mut |frame_index, masks| {
                per_frame.insert(frame_index, masks);
                Ok(())
            })?;
        self.state = SessionState::Propagated;
        tracing::info!("Propagated masks through {} frame(s)", per_frame.len());
        Ok(per_frame)
    }

    /// Releases the session. Closing twice is a no-op.
    pub fn close(&mut self) -> PipelineResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        // Mark closed first so a failed close is not retried on drop
        self.state = SessionState::Closed;
        self.predictor.close_session(&self.id)?;
        tracing::debug!("Segmentation session {} closed", self.id);
        Ok(())
    }
}

impl<P: SegmentationPredictor + ?Sized> Drop for SegmentationSession<'_, P> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to close segmentation session {}: {}", self.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::testing::ScriptedPredictor;

    #[test]
    fn test_happy_path_walks_all_states() {
        let mut predictor = ScriptedPredictor::full_frames(4, 3, 2, 5);
        {
            let mut session = SegmentationSession::start(&mut predictor, Path::new("clip.mp4")).unwrap();
            assert_eq!(session.state(), SessionState::Created);

            let seed = session.prompt(&Prompt::text("cheetah")).unwrap();
            assert_eq!(seed.len(), 2);
            assert_eq!(session.state(), SessionState::Prompted);

            let per_frame = session.propagate().unwrap();
            assert_eq!(per_frame.len(), 5);
            assert_eq!(session.state(), SessionState::Propagated);

            session.close().unwrap();
            assert_eq!(session.state(), SessionState::Closed);
            session.close().unwrap();
        }
        assert_eq!(
            predictor.calls,
            vec![
                "start_session",
                "reset_session",
                "add_prompt",
                "propagate_in_video",
                "close_session"
            ]
        );
    }

    #[test]
    fn test_out_of_order_calls_are_rejected() {
        let mut predictor = ScriptedPredictor::full_frames(2, 2, 1, 3);
        let mut session = SegmentationSession::start(&mut predictor, Path::new("clip.mp4")).unwrap();

        assert!(matches!(
            session.propagate(),
            Err(PipelineError::SessionState {
                state: SessionState::Created,
                ..
            })
        ));

        session.prompt(&Prompt::text("cheetah")).unwrap();
        assert!(session.prompt(&Prompt::text("again")).is_err());

        session.close().unwrap();
        assert!(matches!(
            session.propagate(),
            Err(PipelineError::SessionState {
                state: SessionState::Closed,
                ..
            })
        ));
    }

    #[test]
    fn test_drop_closes_an_abandoned_session() {
        let mut predictor = ScriptedPredictor::full_frames(2, 2, 1, 3);
        {
            let mut session =
                SegmentationSession::start(&mut predictor, Path::new("clip.mp4")).unwrap();
            session.prompt(&Prompt::text("cheetah")).unwrap();
            // Error path: session goes out of scope without close()
        }
        assert_eq!(predictor.calls.last().map(String::as_str), Some("close_session"));
        assert_eq!(
            predictor.calls.iter().filter(|c| *c == "close_session").count(),
            1
        );
    }
}
