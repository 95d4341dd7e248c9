use super::mask::MaskSet;
use super::protocol::{self, SEGMENTER};
use super::{Prompt, SegmentationPredictor, SessionId};
use crate::error::PipelineResult;
use crate::sidecar::{SidecarCommand, SidecarProcess};
use std::path::Path;

/// Segmentation model hosted in a child process.
pub struct SidecarPredictor {
    process: SidecarProcess,
    shut_down: bool,
}

impl SidecarPredictor {
    pub fn spawn(command: &SidecarCommand) -> PipelineResult<Self> {
        Ok(Self {
            process: SidecarProcess::spawn(SEGMENTER, command)?,
            shut_down: false,
        })
    }
}

impl SegmentationPredictor for SidecarPredictor {
    fn start_session(&mut self, resource: &Path) -> PipelineResult<SessionId> {
        protocol::start_session(self.process.channel(), resource)
    }

    fn reset_session(&mut self, session: &SessionId) -> PipelineResult<()> {
        protocol::reset_session(self.process.channel(), session)
    }

    fn add_prompt(
        &mut self,
        session: &SessionId,
        frame_index: usize,
        prompt: &Prompt,
    ) -> PipelineResult<MaskSet> {
        protocol::add_prompt(self.process.channel(), session, frame_index, prompt)
    }

    fn propagate_in_video(
        &mut self,
        session: &SessionId,
        sink: &mut dyn FnMut(usize, MaskSet) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        protocol::propagate_in_video(self.process.channel(), session, sink)
    }

    fn close_session(&mut self, session: &SessionId) -> PipelineResult<()> {
        protocol::close_session(self.process.channel(), session)
    }

    fn shutdown(&mut self) -> PipelineResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        protocol::shutdown(self.process.channel())?;
        self.process.wait()
    }
}
