// Pipeline coordinator: extraction -> masking -> reconstruction
//
// The frame interval is computed exactly once, from the rate of the opened
// source, and handed to both extraction and masking. Stages run one after the
// other and communicate only through the run directory.

use crate::error::PipelineResult;
use crate::pipeline::masking::{mask_video, MaskingReport};
use crate::pipeline::reconstruct::{check_inputs, reconstruct_sequence, ReconstructionReport};
use crate::reconstruction::{ReconstructionModel, SidecarModel};
use crate::run_context::RunLayout;
use crate::segmentation::{Prompt, SegmentationPredictor, SidecarPredictor};
use crate::sidecar::SidecarCommand;
use crate::video::extractor::{extract_frames, ExtractionReport, FrameFormat};
use crate::video::sampler::{compute_interval, validate_target, FrameInterval};
use crate::video::{open_reader, DecoderBackend, VideoReader, VideoSource};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Everything the coordinator needs from the outside world.
pub trait PipelineBackends {
    fn open_reader(&self, source: &VideoSource) -> PipelineResult<Box<dyn VideoReader>>;
    fn load_segmenter(&self) -> PipelineResult<Box<dyn SegmentationPredictor>>;
    fn load_reconstructor(&self) -> PipelineResult<Box<dyn ReconstructionModel>>;
}

/// Local decoders plus the two model sidecars.
pub struct ExternalBackends {
    pub decoder: DecoderBackend,
    pub fps_override: Option<f64>,
    pub segmenter: SidecarCommand,
    pub reconstructor: SidecarCommand,
    pub reconstruction_config: PathBuf,
}

impl PipelineBackends for ExternalBackends {
    fn open_reader(&self, source: &VideoSource) -> PipelineResult<Box<dyn VideoReader>> {
        open_reader(source, self.decoder, self.fps_override)
    }

    fn load_segmenter(&self) -> PipelineResult<Box<dyn SegmentationPredictor>> {
        Ok(Box::new(SidecarPredictor::spawn(&self.segmenter)?))
    }

    fn load_reconstructor(&self) -> PipelineResult<Box<dyn ReconstructionModel>> {
        Ok(Box::new(SidecarModel::load(
            &self.reconstructor,
            &self.reconstruction_config,
        )?))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source: VideoSource,
    pub prompt: Prompt,
    pub target_fps: Option<f64>,
    pub seed: u64,
    pub frame_format: FrameFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub source: PathBuf,
    pub interval: FrameInterval,
    pub extraction: ExtractionReport,
    pub masking: MaskingReport,
    pub reconstruction: ReconstructionReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct PipelineCoordinator<B> {
    backends: B,
    layout: RunLayout,
}

impl<B: PipelineBackends> PipelineCoordinator<B> {
    pub fn new(backends: B, layout: RunLayout) -> Self {
        Self { backends, layout }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn run(&self, request: &PipelineRequest) -> Result<PipelineReport> {
        let layout = &self.layout;
        validate_target(request.target_fps)?;
        if layout.frames_dir == layout.masks_dir {
            anyhow::bail!(
                "Frames and masks must live in separate directories, both are {}",
                layout.frames_dir.display()
            );
        }
        let started_at = Utc::now();
        let source_path = request.source.path();

        tracing::info!("Stage 1/3: extracting frames from {}", source_path.display());
        let mut reader = self.backends.open_reader(&request.source)?;
        let interval = compute_interval(reader.source_fps(), request.target_fps)?;
        tracing::info!(
            "Source runs at {:.3} fps, keeping every {} frame(s)",
            reader.source_fps(),
            interval
        );
        let extraction = extract_frames(
            reader.as_mut(),
            interval,
            request.target_fps,
            &layout.frames_dir,
            request.frame_format,
        )
        .context("Frame extraction failed")?;
        drop(reader);

        tracing::info!("Stage 2/3: segmenting {}", request.prompt);
        let mut reader = self.backends.open_reader(&request.source)?;
        let mut segmenter = self.backends.load_segmenter()?;
        let masking = mask_video(
            segmenter.as_mut(),
            source_path,
            &request.prompt,
            reader.as_mut(),
            interval,
            &layout.masks_dir,
        )
        .context("Masking failed")?;
        drop(reader);

        tracing::info!("Stage 3/3: reconstructing splats");
        check_inputs(&layout.frames_dir, &layout.masks_dir)?;
        let mut model = self.backends.load_reconstructor()?;
        let reconstruction = reconstruct_sequence(
            model.as_mut(),
            &layout.frames_dir,
            &layout.masks_dir,
            &layout.splats_dir,
            request.seed,
            Some(&layout.ledger_path()),
        )
        .context("Reconstruction failed")?;

        let report = PipelineReport {
            source: source_path.to_path_buf(),
            interval,
            extraction,
            masking,
            reconstruction,
            started_at,
            finished_at: Utc::now(),
        };
        let report_path = layout.report_path();
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;

        tracing::info!(
            "Pipeline finished: {} frames requested, {} reconstructed",
            report.reconstruction.frames_requested,
            report.reconstruction.reconstructed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::reconstruction::testing::PlanarModel;
    use crate::run_artifacts::{list_artifacts, list_splats, FRAME_PREFIX};
    use crate::segmentation::testing::ScriptedPredictor;
    use crate::video::testing::SyntheticReader;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::path::Path;

    fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
        err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
    }

    struct FakeBackends {
        fps: f64,
        frame_count: usize,
        missing_masks: BTreeSet<usize>,
        opened: Cell<usize>,
    }

    impl FakeBackends {
        fn new(fps: f64, frame_count: usize) -> Self {
            Self {
                fps,
                frame_count,
                missing_masks: BTreeSet::new(),
                opened: Cell::new(0),
            }
        }
    }

    impl PipelineBackends for FakeBackends {
        fn open_reader(&self, _source: &VideoSource) -> PipelineResult<Box<dyn VideoReader>> {
            self.opened.set(self.opened.get() + 1);
            Ok(Box::new(SyntheticReader::new(self.fps, self.frame_count)))
        }

        fn load_segmenter(&self) -> PipelineResult<Box<dyn SegmentationPredictor>> {
            let mut predictor = ScriptedPredictor::full_frames(8, 6, 2, self.frame_count);
            predictor.missing = self.missing_masks.clone();
            Ok(Box::new(predictor))
        }

        fn load_reconstructor(&self) -> PipelineResult<Box<dyn ReconstructionModel>> {
            Ok(Box::new(PlanarModel::default()))
        }
    }

    fn request(target_fps: Option<f64>) -> PipelineRequest {
        PipelineRequest {
            source: VideoSource::File(PathBuf::from("clip.mp4")),
            prompt: Prompt::text("cheetah"),
            target_fps,
            seed: 42,
            frame_format: FrameFormat::Png,
        }
    }

    fn indices(dir: &Path) -> Vec<usize> {
        list_artifacts(dir, FRAME_PREFIX, None)
            .unwrap()
            .iter()
            .map(|e| e.number)
            .collect()
    }

    #[test]
    fn test_extraction_and_masking_share_one_interval() {
        let root = tempfile::tempdir().unwrap();
        let coordinator =
            PipelineCoordinator::new(FakeBackends::new(30.0, 10), RunLayout::new(root.path()));
        let report = coordinator.run(&request(Some(10.0))).unwrap();

        let layout = coordinator.layout();
        assert_eq!(report.interval.get(), 3);
        assert_eq!(indices(&layout.frames_dir), vec![0, 3, 6, 9]);
        assert_eq!(indices(&layout.masks_dir), indices(&layout.frames_dir));
        assert_eq!(list_splats(&layout.splats_dir).unwrap().len(), 4);
        assert_eq!(report.reconstruction.reconstructed, 4);
        assert!(layout.report_path().exists());
        assert!(layout.ledger_path().exists());
    }

    #[test]
    fn test_missing_masks_are_skipped_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let mut backends = FakeBackends::new(10.0, 10);
        backends.missing_masks = [2, 3].into_iter().collect();
        let coordinator = PipelineCoordinator::new(backends, RunLayout::new(root.path()));

        let report = coordinator.run(&request(None)).unwrap();
        assert_eq!(report.extraction.saved_frames, 10);
        assert_eq!(report.masking.masks_written, 8);
        assert_eq!(report.reconstruction.missing_masks, 2);
        let ordinals: Vec<usize> = list_splats(&coordinator.layout().splats_dir)
            .unwrap()
            .iter()
            .map(|e| e.number)
            .collect();
        assert_eq!(ordinals, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_target_fails_before_opening_anything() {
        let root = tempfile::tempdir().unwrap();
        let coordinator =
            PipelineCoordinator::new(FakeBackends::new(30.0, 10), RunLayout::new(root.path()));
        let err = coordinator.run(&request(Some(0.0))).unwrap_err();

        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::InvalidTarget(_))
        ));
        assert_eq!(coordinator.backends.opened.get(), 0);
        assert!(!coordinator.layout().frames_dir.exists());
    }

    #[test]
    fn test_shared_frames_and_masks_dir_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut layout = RunLayout::new(root.path());
        layout.masks_dir = layout.frames_dir.clone();
        let coordinator = PipelineCoordinator::new(FakeBackends::new(30.0, 4), layout);
        assert!(coordinator.run(&request(None)).is_err());
    }
}
