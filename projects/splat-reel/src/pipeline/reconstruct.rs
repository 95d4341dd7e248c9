// Reconstruction stage: frames + masks -> numbered splats
//
// Frames are visited in index order and paired with the mask of the same index.
// Frames without a usable mask are skipped; the splat ordinal only advances on
// success, so splat names stay dense.

use crate::error::PipelineError;
use crate::reconstruction::{load_image, load_mask, ReconstructionModel, ReconstructionRunner};
use crate::run_artifacts::{
    frame_file_name, list_artifacts, prepare_stage_dir, FRAME_PREFIX, MASK_EXTENSION, SPLAT_PREFIX,
};
use crate::video::extractor::FrameFormat;
use crate::video::processor::stage_progress_bar;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOutcome {
    Reconstructed,
    MissingMask,
    ShapeMismatch,
    Unreadable,
}

#[derive(Serialize)]
struct LedgerRow {
    frame_index: usize,
    frame_file: String,
    outcome: FrameOutcome,
    splat_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconstructionReport {
    pub frames_requested: usize,
    pub reconstructed: usize,
    pub missing_masks: usize,
    pub shape_mismatches: usize,
    pub unreadable: usize,
}

impl ReconstructionReport {
    fn count(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Reconstructed => self.reconstructed += 1,
            FrameOutcome::MissingMask => self.missing_masks += 1,
            FrameOutcome::ShapeMismatch => self.shape_mismatches += 1,
            FrameOutcome::Unreadable => self.unreadable += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.missing_masks + self.shape_mismatches + self.unreadable
    }
}

/// Fails unless both stage inputs exist.
pub fn check_inputs(frames_dir: &Path, masks_dir: &Path) -> Result<(), PipelineError> {
    for dir in [frames_dir, masks_dir] {
        if !dir.is_dir() {
            return Err(PipelineError::PathNotFound(dir.to_path_buf()));
        }
    }
    Ok(())
}

/// Reconstructs every frame in `frames_dir` that has a mask, writing splats to
/// `splats_dir` and, if given, a per-frame ledger CSV. The model is shut down
/// on every exit path.
pub fn reconstruct_sequence<M: ReconstructionModel + ?Sized>(
    model: &mut M,
    frames_dir: &Path,
    masks_dir: &Path,
    splats_dir: &Path,
    seed: u64,
    ledger_path: Option<&Path>,
) -> Result<ReconstructionReport> {
    let result = run_sequence(model, frames_dir, masks_dir, splats_dir, seed, ledger_path);
    let shutdown = model.shutdown();
    let report = result?;
    shutdown.context("Reconstruction model did not shut down cleanly")?;
    Ok(report)
}

fn run_sequence<M: ReconstructionModel + ?Sized>(
    model: &mut M,
    frames_dir: &Path,
    masks_dir: &Path,
    splats_dir: &Path,
    seed: u64,
    ledger_path: Option<&Path>,
) -> Result<ReconstructionReport> {
    check_inputs(frames_dir, masks_dir)?;
    let frames = list_artifacts(frames_dir, FRAME_PREFIX, Some(FrameFormat::ALL_EXTENSIONS))?;
    prepare_stage_dir(splats_dir, SPLAT_PREFIX)?;

    let mut ledger = match ledger_path {
        Some(path) => Some(
            csv::Writer::from_path(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => None,
    };

    let mut runner = ReconstructionRunner::new(model, splats_dir);
    let mut report = ReconstructionReport {
        frames_requested: frames.len(),
        ..Default::default()
    };
    let pb = stage_progress_bar(Some(frames.len()), "reconstruct");

    for frame in &frames {
        let mask_path = masks_dir.join(frame_file_name(frame.number, MASK_EXTENSION));
        let (outcome, splat) = if !mask_path.exists() {
            tracing::warn!(
                "No mask for {} (expected {}), skipping",
                frame.file_name(),
                mask_path.display()
            );
            (FrameOutcome::MissingMask, None)
        } else {
            match load_image(&frame.path).and_then(|image| Ok((image, load_mask(&mask_path)?))) {
                Err(e) => {
                    tracing::warn!("Cannot read inputs for {}: {}", frame.file_name(), e);
                    (FrameOutcome::Unreadable, None)
                }
                Ok((image, mask)) => match runner.reconstruct(&image, &mask, seed) {
                    Ok(path) => (FrameOutcome::Reconstructed, Some(path)),
                    Err(e @ PipelineError::ShapeMismatch { .. }) => {
                        tracing::warn!("Skipping {}: {}", frame.file_name(), e);
                        (FrameOutcome::ShapeMismatch, None)
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("Reconstruction of {} failed", frame.file_name())))
                    }
                },
            }
        };

        report.count(outcome);
        if let Some(ledger) = ledger.as_mut() {
            ledger.serialize(LedgerRow {
                frame_index: frame.number,
                frame_file: frame.file_name(),
                outcome,
                splat_file: splat
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|s| s.to_string_lossy().into_owned()),
            })?;
        }
        pb.inc(1);
    }
    pb.finish_with_message("Done");

    if let Some(mut ledger) = ledger {
        ledger.flush()?;
    }

    tracing::info!(
        "Reconstructed {} of {} frames ({} missing masks, {} shape mismatches, {} unreadable)",
        report.reconstructed,
        report.frames_requested,
        report.missing_masks,
        report.shape_mismatches,
        report.unreadable
    );
    Ok(report)
}
