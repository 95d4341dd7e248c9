pub mod ply;
pub mod sidecar;

use crate::error::{PipelineError, PipelineResult};
use crate::run_artifacts::splat_file_name;
use crate::segmentation::mask::BoolMask;
use image::RgbaImage;
use ply::PlyTable;
use std::path::{Path, PathBuf};

pub use sidecar::SidecarModel;

/// Single-image 3D reconstruction model.
pub trait ReconstructionModel {
    /// Reconstructs the masked subject of `image`. The same inputs and seed
    /// must give the same table.
    fn infer(&mut self, image: &RgbaImage, mask: &BoolMask, seed: u64) -> PipelineResult<PlyTable>;

    fn shutdown(&mut self) -> PipelineResult<()>;
}

pub fn load_image(path: &Path) -> PipelineResult<RgbaImage> {
    Ok(image::open(path)?.to_rgba8())
}

/// Loads a mask artifact as a boolean raster (alpha if present, else luma, > 0).
pub fn load_mask(path: &Path) -> PipelineResult<BoolMask> {
    Ok(BoolMask::from_artifact(&image::open(path)?))
}

/// Turns (image, mask) pairs into densely numbered splat files.
pub struct ReconstructionRunner<'m, M: ReconstructionModel + ?Sized> {
    model: &'m mut M,
    output_dir: PathBuf,
    next_ordinal: usize,
}

impl<'m, M: ReconstructionModel + ?Sized> ReconstructionRunner<'m, M> {
    pub fn new(model: &'m mut M, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            output_dir: output_dir.into(),
            next_ordinal: 0,
        }
    }

    /// Ordinal the next successful reconstruction will be written under.
    pub fn next_ordinal(&self) -> usize {
        self.next_ordinal
    }

    /// Runs the model and writes `splat_<ordinal>.ply`. The ordinal only
    /// advances when a file was written.
    pub fn reconstruct(
        &mut self,
        image: &RgbaImage,
        mask: &BoolMask,
        seed: u64,
    ) -> PipelineResult<PathBuf> {
        if image.dimensions() != mask.dimensions() {
            return Err(PipelineError::shape_mismatch(
                image.dimensions(),
                mask.dimensions(),
            ));
        }

        let table = self.model.infer(image, mask, seed)?;
        let path = self.output_dir.join(splat_file_name(self.next_ordinal));
        table.save_new(&path)?;
        tracing::debug!("Wrote {} ({} points)", path.display(), table.len());
        self.next_ordinal += 1;
        Ok(path)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::reconstruction::ply::PointCloud;

    /// Lifts every foreground pixel to a point at `(x, -y, depth)` with the
    /// pixel's color, where `depth` depends on the seed.
    #[derive(Default)]
    pub struct PlanarModel {
        pub seeds: Vec<u64>,
        pub shut_down: bool,
    }

    impl ReconstructionModel for PlanarModel {
        fn infer(&mut self, image: &RgbaImage, mask: &BoolMask, seed: u64) -> PipelineResult<PlyTable> {
            self.seeds.push(seed);
            let depth = (seed % 7) as f32;
            let mut cloud = PointCloud::default();
            for (x, y, pixel) in image.enumerate_pixels() {
                if mask.get(x, y) {
                    cloud.positions.push([x as f32, -(y as f32), depth]);
                    cloud.colors.push([pixel[0], pixel[1], pixel[2]]);
                }
            }
            Ok(cloud.to_table())
        }

        fn shutdown(&mut self) -> PipelineResult<()> {
            self.shut_down = true;
            Ok(())
        }
    }

    #[test]
    fn test_runner_numbers_outputs_densely() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = PlanarModel::default();
        let mut runner = ReconstructionRunner::new(&mut model, dir.path());

        let image = RgbaImage::new(4, 3);
        let mask = BoolMask::from_fn(4, 3, |x, _| x == 1);
        let first = runner.reconstruct(&image, &mask, 42).unwrap();
        let second = runner.reconstruct(&image, &mask, 42).unwrap();

        assert_eq!(first.file_name().unwrap(), "splat_000.ply");
        assert_eq!(second.file_name().unwrap(), "splat_001.ply");
        assert_eq!(runner.next_ordinal(), 2);
        assert_eq!(PlyTable::from_file(&first).unwrap().len(), 3);
        assert_eq!(model.seeds, vec![42, 42]);
    }

    #[test]
    fn test_shape_mismatch_does_not_consume_an_ordinal() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = PlanarModel::default();
        let mut runner = ReconstructionRunner::new(&mut model, dir.path());

        let err = runner
            .reconstruct(&RgbaImage::new(4, 3), &BoolMask::new(3, 4), 0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
        assert_eq!(runner.next_ordinal(), 0);
        assert!(model.seeds.is_empty());
    }

    #[test]
    fn test_existing_splat_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("splat_000.ply"), b"keep").unwrap();
        let mut model = PlanarModel::default();
        let mut runner = ReconstructionRunner::new(&mut model, dir.path());

        let mask = BoolMask::new(2, 2);
        assert!(runner.reconstruct(&RgbaImage::new(2, 2), &mask, 0).is_err());
        assert_eq!(runner.next_ordinal(), 0);
        assert_eq!(std::fs::read(dir.path().join("splat_000.ply")).unwrap(), b"keep");
    }

    #[test]
    fn test_mask_loading_prefers_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_000000.png");
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(1, 0, image::Rgba([0, 0, 0, 255]));
        rgba.save(&path).unwrap();

        let mask = load_mask(&path).unwrap();
        assert_eq!(mask.bits(), &[false, true]);
    }
}
