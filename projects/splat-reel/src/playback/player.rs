// Sequence playback under a frozen camera
//
// LOADED -> VIEW_PICKED -> RECORDING -> FINISHED. The viewpoint is captured once
// on the first splat and reused unchanged for every frame. Output frame i is
// splat i in ordinal order; frames are never dropped or repeated.

use super::camera::CameraViewpoint;
use super::render::{Rasterizer, RenderSettings, Renderable};
use crate::error::{PipelineError, PipelineResult};
use crate::reconstruction::ply::{PlyTable, PointCloud};
use crate::run_artifacts::{list_splats, ArtifactEntry};
use crate::video::processor::stage_progress_bar;
use image::RgbImage;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Loaded,
    ViewPicked,
    Recording,
    Finished,
}

/// Destination of recorded frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> PipelineResult<()>;

    /// Flushes and closes the output. Called exactly once per recording.
    fn finish(&mut self) -> PipelineResult<()>;
}

/// Where the operator sees the scene.
pub trait ViewSurface {
    /// Lets the operator orient the camera around `first`, starting from
    /// `initial`, and returns the confirmed viewpoint.
    fn pick_viewpoint(
        &mut self,
        first: &Renderable,
        initial: CameraViewpoint,
        rasterizer: &mut Rasterizer,
    ) -> PipelineResult<CameraViewpoint>;

    fn present(&mut self, frame: &RgbImage) -> PipelineResult<()>;

    fn close(&mut self) -> PipelineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    pub render: RenderSettings,
    pub fps: f64,
    /// Hold each frame for its nominal duration.
    pub realtime: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            render: RenderSettings::default(),
            fps: 5.0,
            realtime: true,
        }
    }
}

/// Remaining wait to fill `frame_duration` after `elapsed`; never negative.
pub fn frame_wait(frame_duration: Duration, elapsed: Duration) -> Duration {
    frame_duration.saturating_sub(elapsed)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingReport {
    pub frames_written: usize,
    pub viewpoint: CameraViewpoint,
}

pub struct SequencePlayer {
    splats: Vec<ArtifactEntry>,
    first: PointCloud,
    settings: PlaybackSettings,
    viewpoint: Option<CameraViewpoint>,
    state: PlayerState,
}

fn load_cloud(path: &Path) -> PipelineResult<PointCloud> {
    PointCloud::from_table(&PlyTable::from_file(path)?)
}

impl SequencePlayer {
    /// Lists the splats of `splats_dir` in ordinal order and parses the first
    /// one. Fails with `EmptySequence` when there is nothing to play.
    pub fn load(splats_dir: &Path, settings: PlaybackSettings) -> PipelineResult<Self> {
        if !splats_dir.is_dir() {
            return Err(PipelineError::PathNotFound(splats_dir.to_path_buf()));
        }
        let splats = list_splats(splats_dir)?;
        let Some(head) = splats.first() else {
            return Err(PipelineError::EmptySequence(splats_dir.to_path_buf()));
        };
        let first = load_cloud(&head.path)?;
        tracing::info!(
            "Loaded {} splats from {} (first has {} points)",
            splats.len(),
            splats_dir.display(),
            first.len()
        );
        Ok(Self {
            splats,
            first,
            settings,
            viewpoint: None,
            state: PlayerState::Loaded,
        })
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn viewpoint(&self) -> Option<CameraViewpoint> {
        self.viewpoint
    }

    fn expect_state(&self, expected: PlayerState) -> PipelineResult<()> {
        if self.state != expected {
            return Err(PipelineError::Recording(format!(
                "player is {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }

    /// Freezes the viewpoint. A `preset` is taken as is; otherwise the surface
    /// asks the operator. The surface is closed if picking fails.
    pub fn pick_view(
        &mut self,
        surface: &mut dyn ViewSurface,
        preset: Option<CameraViewpoint>,
    ) -> PipelineResult<CameraViewpoint> {
        self.expect_state(PlayerState::Loaded)?;
        let viewpoint = match preset {
            Some(viewpoint) => viewpoint,
            None => {
                let mut renderable = Renderable::new();
                renderable.update_geometry(&self.first);
                let mut rasterizer = Rasterizer::new(self.settings.render);
                let initial = CameraViewpoint::framing(&self.first);
                match surface.pick_viewpoint(&renderable, initial, &mut rasterizer) {
                    Ok(viewpoint) => viewpoint,
                    Err(e) => {
                        self.abandon(surface);
                        return Err(e);
                    }
                }
            }
        };
        tracing::info!(
            "Viewpoint frozen: eye {:?} target {:?}",
            viewpoint.eye,
            viewpoint.target
        );
        self.viewpoint = Some(viewpoint);
        self.state = PlayerState::ViewPicked;
        Ok(viewpoint)
    }

    /// Ends playback without recording: closes the surface and moves to
    /// `Finished`. For callers that fail between picking and recording.
    pub fn abandon(&mut self, surface: &mut dyn ViewSurface) {
        if let Err(e) = surface.close() {
            tracing::warn!("Failed to close view surface: {}", e);
        }
        self.state = PlayerState::Finished;
    }

    /// Records every splat under the frozen viewpoint into the sink made by
    /// `open_sink`. The sink is only created here, and both sink and surface
    /// are closed whatever the outcome.
    pub fn record<F>(
        &mut self,
        surface: &mut dyn ViewSurface,
        open_sink: F,
    ) -> PipelineResult<RecordingReport>
    where
        F: FnOnce(&RenderSettings) -> PipelineResult<Box<dyn FrameSink>>,
    {
        self.expect_state(PlayerState::ViewPicked)?;
        let viewpoint = self
            .viewpoint
            .ok_or_else(|| PipelineError::Recording("no viewpoint picked".to_string()))?;

        let mut sink = match open_sink(&self.settings.render) {
            Ok(sink) => sink,
            Err(e) => {
                self.abandon(surface);
                return Err(e);
            }
        };

        self.state = PlayerState::Recording;
        let result = self.record_frames(surface, sink.as_mut(), &viewpoint);
        let finished = sink.finish();
        let closed = surface.close();
        self.state = PlayerState::Finished;

        let frames_written = result?;
        finished?;
        closed?;
        Ok(RecordingReport {
            frames_written,
            viewpoint,
        })
    }

    fn record_frames(
        &self,
        surface: &mut dyn ViewSurface,
        sink: &mut dyn FrameSink,
        viewpoint: &CameraViewpoint,
    ) -> PipelineResult<usize> {
        let mut renderable = Renderable::new();
        let mut rasterizer = Rasterizer::new(self.settings.render);
        let frame_duration = Duration::from_secs_f64(1.0 / self.settings.fps.max(f64::EPSILON));
        let pb = stage_progress_bar(Some(self.splats.len()), "record");

        for (i, entry) in self.splats.iter().enumerate() {
            let started = Instant::now();
            if i == 0 {
                renderable.update_geometry(&self.first);
            } else {
                renderable.update_geometry(&load_cloud(&entry.path)?);
            }

            let frame = rasterizer.render(&renderable, viewpoint);
            surface.present(frame)?;
            sink.write_frame(frame)?;
            pb.inc(1);

            if self.settings.realtime {
                std::thread::sleep(frame_wait(frame_duration, started.elapsed()));
            }
        }
        pb.finish_with_message("Done");
        Ok(self.splats.len())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{MemorySink, ScriptedSurface, SinkLog};
    use super::*;
    use crate::run_artifacts::splat_file_name;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn settings() -> PlaybackSettings {
        PlaybackSettings {
            render: RenderSettings {
                width: 32,
                height: 24,
                point_size: 2,
                background: [0, 0, 0],
            },
            fps: 5.0,
            realtime: false,
        }
    }

    fn write_splats(dir: &Path, count: usize) {
        for i in 0..count {
            let cloud = PointCloud {
                positions: vec![[0.0, 0.0, 0.0], [i as f32 * 0.1, 0.2, 0.0]],
                colors: vec![[255, 0, 0], [0, (i * 20) as u8, 255]],
            };
            cloud.to_table().save_new(&dir.join(splat_file_name(i))).unwrap();
        }
    }

    fn memory_sink() -> (Rc<RefCell<SinkLog>>, MemorySink) {
        let log = Rc::new(RefCell::new(SinkLog::default()));
        (log.clone(), MemorySink(log))
    }

    #[test]
    fn test_records_one_frame_per_splat_under_a_frozen_view() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 6);

        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        assert_eq!(player.state(), PlayerState::Loaded);
        let mut surface = ScriptedSurface {
            yaw_steps: 3.0,
            ..Default::default()
        };
        let picked = player.pick_view(&mut surface, None).unwrap();
        assert_eq!(player.state(), PlayerState::ViewPicked);

        let (log, sink) = memory_sink();
        let report = player
            .record(&mut surface, move |render| {
                assert_eq!((render.width, render.height), (32, 24));
                Ok(Box::new(sink) as Box<dyn FrameSink>)
            })
            .unwrap();

        assert_eq!(report.frames_written, 6);
        assert_eq!(report.viewpoint, picked);
        assert_eq!(player.viewpoint(), Some(picked));
        assert_eq!(player.state(), PlayerState::Finished);
        assert_eq!(log.borrow().frames.len(), 6);
        assert_eq!(log.borrow().finished, 1);
        assert_eq!(surface.presented, 6);
        assert_eq!(surface.closed, 1);
    }

    #[test]
    fn test_empty_directory_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = SequencePlayer::load(dir.path(), settings()).err().unwrap();
        assert!(matches!(err, PipelineError::EmptySequence(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_preset_view_skips_the_operator() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 2);
        let preset = CameraViewpoint {
            eye: [1.0, 2.0, 3.0],
            ..CameraViewpoint::default()
        };

        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        let mut surface = ScriptedSurface {
            abort: true,
            ..Default::default()
        };
        assert_eq!(player.pick_view(&mut surface, Some(preset)).unwrap(), preset);
    }

    #[test]
    fn test_aborted_pick_closes_the_surface() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 2);
        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        let mut surface = ScriptedSurface {
            abort: true,
            ..Default::default()
        };

        assert!(matches!(
            player.pick_view(&mut surface, None),
            Err(PipelineError::ViewAborted)
        ));
        assert_eq!(surface.closed, 1);
        assert!(player
            .record(&mut surface, |_| panic!("sink must not be created"))
            .is_err());
    }

    #[test]
    fn test_corrupt_splat_still_finishes_sink_and_surface() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 3);
        std::fs::write(dir.path().join(splat_file_name(3)), b"garbage").unwrap();

        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        let mut surface = ScriptedSurface::default();
        player.pick_view(&mut surface, None).unwrap();

        let (log, sink) = memory_sink();
        let err = player
            .record(&mut surface, move |_| Ok(Box::new(sink) as Box<dyn FrameSink>))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Ply(_)));
        assert_eq!(log.borrow().frames.len(), 3);
        assert_eq!(log.borrow().finished, 1);
        assert_eq!(surface.closed, 1);
        assert_eq!(player.state(), PlayerState::Finished);
    }

    #[test]
    fn test_sink_failure_closes_the_surface() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 2);
        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        let mut surface = ScriptedSurface::default();
        player.pick_view(&mut surface, None).unwrap();

        let err = player
            .record(&mut surface, |_| {
                Err(PipelineError::Recording("no encoder".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Recording(_)));
        assert_eq!(surface.presented, 0);
        assert_eq!(surface.closed, 1);
        assert_eq!(player.state(), PlayerState::Finished);
    }

    #[test]
    fn test_abandoning_after_the_pick_closes_the_surface() {
        let dir = tempfile::tempdir().unwrap();
        write_splats(dir.path(), 2);
        let mut player = SequencePlayer::load(dir.path(), settings()).unwrap();
        let mut surface = ScriptedSurface::default();
        player.pick_view(&mut surface, None).unwrap();

        player.abandon(&mut surface);
        assert_eq!(surface.closed, 1);
        assert_eq!(player.state(), PlayerState::Finished);
        assert!(player
            .record(&mut surface, |_| panic!("sink must not be created"))
            .is_err());
    }

    #[test]
    fn test_pacing_never_waits_negative() {
        let nominal = Duration::from_millis(200);
        assert_eq!(frame_wait(nominal, Duration::from_millis(50)), Duration::from_millis(150));
        assert_eq!(frame_wait(nominal, Duration::from_millis(200)), Duration::ZERO);
        assert_eq!(frame_wait(nominal, Duration::from_secs(3)), Duration::ZERO);
    }
}
