use super::VideoReader;
use crate::error::{PipelineError, PipelineResult};
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT},
};
use std::path::{Path, PathBuf};

pub struct OpencvReader {
    capture: VideoCapture,
    path: PathBuf,
    source_fps: f64,
    reported_frames: usize,
}

impl OpencvReader {
    pub fn new(path: &Path, fps_override: Option<f64>) -> PipelineResult<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::source_unreadable(path, "path is not valid UTF-8"))?;

        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .map_err(|e| PipelineError::source_unreadable(path, e))?;
        if !capture.is_opened()? {
            return Err(PipelineError::source_unreadable(
                path,
                "VideoCapture could not open the file",
            ));
        }

        let metadata_fps = capture.get(CAP_PROP_FPS)?;
        let source_fps = fps_override.unwrap_or(metadata_fps);
        if metadata_fps <= 0.0 && fps_override.is_none() {
            tracing::warn!("OpencvReader: container reports no FPS for {}", path.display());
        }
        let reported_frames = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;

        tracing::info!(
            "OpencvReader: opened {}, fps={:.2}, stream_frames={}",
            path.display(),
            source_fps,
            reported_frames
        );

        Ok(Self {
            capture,
            path: path.to_path_buf(),
            source_fps,
            reported_frames,
        })
    }
}

impl VideoReader for OpencvReader {
    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn frame_count_hint(&self) -> Option<usize> {
        (self.reported_frames > 0).then_some(self.reported_frames)
    }

    fn next_frame(&mut self) -> PipelineResult<Option<RgbImage>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            tracing::debug!("OpencvReader: end of stream for {}", self.path.display());
            return Ok(None);
        }

        Ok(Some(bgr_mat_to_rgb_image(&frame)?))
    }
}

/// Convert an OpenCV Mat (BGR) to an owned RGB image.
pub fn bgr_mat_to_rgb_image(mat: &Mat) -> PipelineResult<RgbImage> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        rgb_mat = rgb_mat.try_clone()?;
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    RgbImage::from_vec(width, height, buffer).ok_or_else(|| {
        PipelineError::source_unreadable(
            PathBuf::new(),
            format!("decoded frame of {width}x{height} has an unexpected buffer size"),
        )
    })
}
