pub mod camera;
pub mod player;
pub mod recorder;
pub mod render;
pub mod window;

use anyhow::{Context, Result};
use camera::CameraViewpoint;
use player::{FrameSink, PlaybackSettings, RecordingReport, SequencePlayer, ViewSurface};
use recorder::OpencvRecorder;
use std::path::PathBuf;
use window::{HeadlessSurface, HighguiSurface};

#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub splats_dir: PathBuf,
    pub output: PathBuf,
    pub view_in: Option<PathBuf>,
    pub view_out: Option<PathBuf>,
    pub headless: bool,
    pub settings: PlaybackSettings,
}

/// Loads a splat sequence, freezes a viewpoint and records the sequence to
/// `options.output`.
pub fn play(options: &PlayOptions) -> Result<RecordingReport> {
    // Nothing is opened or created until the sequence is known to be non-empty
    let mut player = SequencePlayer::load(&options.splats_dir, options.settings)?;

    let preset = options
        .view_in
        .as_deref()
        .map(CameraViewpoint::load)
        .transpose()
        .context("Failed to load viewpoint")?;

    let mut surface: Box<dyn ViewSurface> = if options.headless {
        Box::new(HeadlessSurface)
    } else {
        Box::new(HighguiSurface::new("splat-reel"))
    };

    let viewpoint = player.pick_view(surface.as_mut(), preset)?;
    if let Some(path) = &options.view_out {
        if let Err(e) = viewpoint.save(path) {
            player.abandon(surface.as_mut());
            return Err(e).with_context(|| format!("Failed to save viewpoint to {}", path.display()));
        }
    }

    let fps = options.settings.fps;
    let output = options.output.clone();
    let report = player.record(surface.as_mut(), move |render| {
        let recorder = OpencvRecorder::create(&output, fps, render.width, render.height)?;
        Ok(Box::new(recorder) as Box<dyn FrameSink>)
    })?;

    tracing::info!(
        "Recorded {} frames to {}",
        report.frames_written,
        options.output.display()
    );
    Ok(report)
}
