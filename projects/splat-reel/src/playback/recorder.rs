use super::player::FrameSink;
use crate::error::{PipelineError, PipelineResult};
use image::RgbImage;
use opencv::{
    core::{Mat, Scalar, Size, CV_8UC3},
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};

/// Copies an RGB image into a new BGR `Mat`.
pub fn rgb_image_to_bgr_mat(image: &RgbImage) -> PipelineResult<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )?;
    let bytes = mat.data_bytes_mut()?;
    for (dst, src) in bytes.chunks_exact_mut(3).zip(image.pixels()) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(mat)
}

/// Fixed-size, fixed-rate `mp4v` video file.
pub struct OpencvRecorder {
    writer: VideoWriter,
    path: PathBuf,
    width: u32,
    height: u32,
    frames: usize,
    finished: bool,
}

impl OpencvRecorder {
    pub fn create(path: &Path, fps: f64, width: u32, height: u32) -> PipelineResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::Recording(format!("{} is not valid UTF-8", path.display())))?;

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(PipelineError::Recording(format!(
                "VideoWriter could not open {}",
                path.display()
            )));
        }

        tracing::info!(
            "Recording {}x{} at {} fps to {}",
            width,
            height,
            fps,
            path.display()
        );
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            width,
            height,
            frames: 0,
            finished: false,
        })
    }
}

impl FrameSink for OpencvRecorder {
    fn write_frame(&mut self, frame: &RgbImage) -> PipelineResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(PipelineError::Recording(format!(
                "frame is {}x{}, video is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let mat = rgb_image_to_bgr_mat(frame)?;
        self.writer.write(&mat)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> PipelineResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.release()?;
        tracing::info!("Wrote {} frames to {}", self.frames, self.path.display());
        Ok(())
    }
}
