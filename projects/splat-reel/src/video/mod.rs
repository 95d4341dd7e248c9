pub mod extractor;
pub mod ffmpeg_reader;
pub mod folder_reader;
pub mod opencv_reader;
pub mod processor;
pub mod sampler;

use crate::error::{PipelineError, PipelineResult};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Sequential frame source. Frames come out in decode order; the end of the
/// stream is the only authority on how many frames exist.
pub trait VideoReader {
    fn source_fps(&self) -> f64;

    /// Next decoded frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> PipelineResult<Option<RgbImage>>;

    /// Container-reported frame count. Only good enough for progress display.
    fn frame_count_hint(&self) -> Option<usize> {
        None
    }
}

/// Where frames come from: a container file or a folder of numbered stills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    File(PathBuf),
    Folder(PathBuf),
}

impl VideoSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::Folder(path)
        } else {
            Self::File(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Folder(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DecoderBackend {
    Opencv,
    Ffmpeg,
}

/// Opens a reader for `source`. `fps_override` replaces the container rate and is
/// the only rate a folder source has.
pub fn open_reader(
    source: &VideoSource,
    backend: DecoderBackend,
    fps_override: Option<f64>,
) -> PipelineResult<Box<dyn VideoReader>> {
    if !source.path().exists() {
        return Err(PipelineError::source_unreadable(
            source.path(),
            "path does not exist",
        ));
    }

    let reader: Box<dyn VideoReader> = match (source, backend) {
        (VideoSource::Folder(dir), _) => Box::new(folder_reader::FolderReader::new(
            dir,
            fps_override.unwrap_or(0.0),
        )?),
        (VideoSource::File(path), DecoderBackend::Ffmpeg) => {
            Box::new(ffmpeg_reader::FfmpegReader::new(path, fps_override)?)
        }
        (VideoSource::File(path), DecoderBackend::Opencv) => {
            Box::new(opencv_reader::OpencvReader::new(path, fps_override)?)
        }
    };

    Ok(reader)
}
