// Frame extraction: decode a source and persist the kept frames
//
// Output is `frame_<index>.<ext>` per kept frame plus a sampling record. The
// source is opened before the output directory is touched, so an unreadable
// source leaves no artifacts behind.

use crate::run_artifacts::{frame_file_name, prepare_stage_dir, SamplingRecord, FRAME_PREFIX};
use crate::video::processor::{process_sampled, SampledFrame};
use crate::video::sampler::{compute_interval, validate_target, FrameInterval};
use crate::video::{open_reader, DecoderBackend, VideoReader, VideoSource};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Png,
    Jpg,
    Bmp,
    Tiff,
}

impl FrameFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    /// Extensions any format may have been written with.
    pub const ALL_EXTENSIONS: &'static [&'static str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub source_fps: f64,
    pub interval: FrameInterval,
    pub decoded_frames: usize,
    pub saved_frames: usize,
}

/// Saves every frame of `reader` kept under `interval` into `output_dir`.
pub fn extract_frames(
    reader: &mut dyn VideoReader,
    interval: FrameInterval,
    target_fps: Option<f64>,
    output_dir: &Path,
    format: FrameFormat,
) -> Result<ExtractionReport> {
    let source_fps = reader.source_fps();
    let removed = prepare_stage_dir(output_dir, FRAME_PREFIX)?;
    if removed > 0 {
        tracing::warn!("Re-running extraction over an existing frames directory");
    }

    tracing::info!(
        "Extracting frames at {:.3} fps (interval {}) into {}",
        source_fps,
        interval,
        output_dir.display()
    );

    let extension = format.extension();
    let stats = process_sampled(
        reader,
        interval,
        "extract",
        |frame: SampledFrame| -> Result<()> {
            let path = output_dir.join(frame_file_name(frame.index, extension));
            frame
                .image
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    let record = SamplingRecord {
        source_fps,
        target_fps,
        interval,
        decoded_frames: stats.decoded_frames,
        saved_frames: stats.kept_frames,
        image_extension: extension.to_string(),
    };
    record.save(output_dir)?;

    tracing::info!(
        "Extracted {} of {} decoded frames in {:.2?}",
        stats.kept_frames,
        stats.decoded_frames,
        stats.duration
    );

    Ok(ExtractionReport {
        source_fps,
        interval,
        decoded_frames: stats.decoded_frames,
        saved_frames: stats.kept_frames,
    })
}

/// Opens `source`, derives the interval from its rate and extracts.
pub fn extract_video(
    source: &VideoSource,
    backend: DecoderBackend,
    fps_override: Option<f64>,
    target_fps: Option<f64>,
    output_dir: &Path,
    format: FrameFormat,
) -> Result<ExtractionReport> {
    validate_target(target_fps)?;
    let mut reader = open_reader(source, backend, fps_override)?;
    let interval = compute_interval(reader.source_fps(), target_fps)?;
    extract_frames(reader.as_mut(), interval, target_fps, output_dir, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::run_artifacts::{list_artifacts, parse_artifact_number};
    use crate::video::testing::SyntheticReader;

    #[test]
    fn test_extracts_kept_indices_with_padded_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = SyntheticReader::new(240.0, 481);
        let interval = compute_interval(240.0, Some(2.0)).unwrap();

        let report = extract_frames(&mut reader, interval, Some(2.0), dir.path(), FrameFormat::Png).unwrap();
        assert_eq!(report.decoded_frames, 481);
        assert_eq!(report.saved_frames, 5);

        let names: Vec<String> = list_artifacts(dir.path(), FRAME_PREFIX, Some(FrameFormat::ALL_EXTENSIONS))
            .unwrap()
            .iter()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "frame_000000.png",
                "frame_000120.png",
                "frame_000240.png",
                "frame_000360.png",
                "frame_000480.png"
            ]
        );
        assert!(names.iter().all(|n| parse_artifact_number(n, FRAME_PREFIX).unwrap() % 120 == 0));

        let record = SamplingRecord::load(dir.path()).unwrap().unwrap();
        assert_eq!(record.interval, interval);
        assert_eq!(record.saved_frames, 5);
    }

    #[test]
    fn test_extracted_pixels_match_decode_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = SyntheticReader::new(30.0, 7);
        let interval = compute_interval(30.0, Some(10.0)).unwrap();
        extract_frames(&mut reader, interval, Some(10.0), dir.path(), FrameFormat::Png).unwrap();

        let frame = image::open(dir.path().join("frame_000006.png")).unwrap().to_rgb8();
        assert_eq!(frame.get_pixel(0, 0)[0], 6);
    }

    #[test]
    fn test_rerun_replaces_stale_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = SyntheticReader::new(10.0, 10);
        extract_frames(&mut reader, FrameInterval::EVERY_FRAME, None, dir.path(), FrameFormat::Png).unwrap();

        let mut reader = SyntheticReader::new(10.0, 10);
        let interval = compute_interval(10.0, Some(2.0)).unwrap();
        extract_frames(&mut reader, interval, Some(2.0), dir.path(), FrameFormat::Bmp).unwrap();

        let entries = list_artifacts(dir.path(), FRAME_PREFIX, None).unwrap();
        let indices: Vec<usize> = entries.iter().map(|e| e.number).collect();
        assert_eq!(indices, vec![0, 5]);
        assert!(entries.iter().all(|e| e.file_name().ends_with(".bmp")));
    }

    #[test]
    fn test_unreadable_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("frames");
        let err = extract_video(
            &VideoSource::from_path(dir.path().join("missing.mp4")),
            DecoderBackend::Opencv,
            None,
            None,
            &output,
            FrameFormat::Png,
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SourceUnreadable { .. })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn test_invalid_target_is_rejected_before_opening_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("frames");
        let err = extract_video(
            &VideoSource::from_path(dir.path().join("missing.mp4")),
            DecoderBackend::Opencv,
            None,
            Some(0.0),
            &output,
            FrameFormat::Png,
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidTarget(_))
        ));
        assert!(!output.exists());
    }
}
