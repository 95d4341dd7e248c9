// Masking stage: segment the subject across the video and write masked frames
//
// Segmentation runs over the whole source; compositing then walks the source
// again with the extraction interval so mask artifacts exist only for indices
// that have an extracted frame.

use crate::pipeline::compositor::MaskCompositor;
use crate::run_artifacts::{prepare_stage_dir, SamplingRecord, FRAME_PREFIX};
use crate::segmentation::mask::MaskSet;
use crate::segmentation::{Prompt, SegmentationPredictor, SegmentationSession};
use crate::video::processor::{process_sampled, SampledFrame};
use crate::video::sampler::{compute_interval, FrameInterval};
use crate::video::VideoReader;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaskingReport {
    /// Frames the segmenter produced masks for.
    pub propagated_frames: usize,
    pub kept_frames: usize,
    pub masks_written: usize,
    pub skipped_frames: usize,
}

/// Picks the interval the masking stage must use: the one recorded by the
/// extraction that produced `frames_dir` if there is such a record, otherwise
/// one computed from the rates.
pub fn masking_interval(
    frames_dir: Option<&Path>,
    source_fps: f64,
    target_fps: Option<f64>,
) -> Result<FrameInterval> {
    let record = match frames_dir {
        Some(dir) => SamplingRecord::load(dir)?,
        None => None,
    };
    let Some(record) = record else {
        return Ok(compute_interval(source_fps, target_fps)?);
    };

    if record.target_fps != target_fps && target_fps.is_some() {
        tracing::warn!(
            "Requested target {:?} fps differs from the extraction's {:?} fps; using the recorded interval {}",
            target_fps,
            record.target_fps,
            record.interval
        );
    }
    if (record.source_fps - source_fps).abs() > 1e-6 {
        tracing::warn!(
            "Source reports {:.3} fps but frames were extracted at {:.3} fps",
            source_fps,
            record.source_fps
        );
    }
    Ok(record.interval)
}

/// Segments `resource` with `prompt` and writes one masked RGBA frame per kept
/// index of `reader`. The predictor is shut down on every exit path.
pub fn mask_video<P: SegmentationPredictor + ?Sized>(
    predictor: &mut P,
    resource: &Path,
    prompt: &Prompt,
    reader: &mut dyn VideoReader,
    interval: FrameInterval,
    masks_dir: &Path,
) -> Result<MaskingReport> {
    let result = segment_and_composite(predictor, resource, prompt, reader, interval, masks_dir);
    let shutdown = predictor.shutdown();
    let report = result?;
    shutdown.context("Segmenter did not shut down cleanly")?;
    Ok(report)
}

fn segment_and_composite<P: SegmentationPredictor + ?Sized>(
    predictor: &mut P,
    resource: &Path,
    prompt: &Prompt,
    reader: &mut dyn VideoReader,
    interval: FrameInterval,
    masks_dir: &Path,
) -> Result<MaskingReport> {
    let per_frame = segment(predictor, resource, prompt)?;

    prepare_stage_dir(masks_dir, FRAME_PREFIX)?;
    let compositor = MaskCompositor::new(masks_dir);
    let mut report = MaskingReport {
        propagated_frames: per_frame.len(),
        ..Default::default()
    };

    let stats = process_sampled(reader, interval, "mask", |frame: SampledFrame| -> Result<()> {
        let Some(masks) = per_frame.get(&frame.index) else {
            tracing::warn!("No masks propagated for frame {}, skipping", frame.index);
            report.skipped_frames += 1;
            return Ok(());
        };
        match compositor.write(frame.index, &frame.image, masks.values()) {
            Ok(_) => report.masks_written += 1,
            Err(e) if e.is_per_frame() => {
                tracing::warn!("Skipping mask for frame {}: {}", frame.index, e);
                report.skipped_frames += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    })?;
    report.kept_frames = stats.kept_frames;

    tracing::info!(
        "Masking finished: {} kept, {} written, {} skipped",
        report.kept_frames,
        report.masks_written,
        report.skipped_frames
    );
    Ok(report)
}

fn segment<P: SegmentationPredictor + ?Sized>(
    predictor: &mut P,
    resource: &Path,
    prompt: &Prompt,
) -> Result<BTreeMap<usize, MaskSet>> {
    let mut session = SegmentationSession::start(predictor, resource)
        .with_context(|| format!("Failed to start segmentation of {}", resource.display()))?;

    let seed = session.prompt(prompt)?;
    let covered: usize = seed.values().map(|m| m.foreground_count()).sum();
    if covered == 0 {
        tracing::warn!("Prompt {} matched nothing on the seed frame", prompt);
    } else {
        tracing::info!(
            "Prompt {} matched {} object(s), {} pixels on the seed frame",
            prompt,
            seed.len(),
            covered
        );
    }
    let per_frame = session.propagate()?;
    session.close()?;
    Ok(per_frame)
}
