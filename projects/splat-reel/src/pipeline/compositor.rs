// Mask compositing
//
// Object masks of a frame are ORed into one combined mask, which then cuts the
// subject out of the original raster: foreground pixels keep their color at
// full opacity, background pixels become fully transparent black.

use crate::error::{PipelineError, PipelineResult};
use crate::run_artifacts::{frame_file_name, MASK_EXTENSION};
use crate::segmentation::mask::BoolMask;
use image::{Rgba, RgbaImage, RgbImage};
use std::path::{Path, PathBuf};

/// ORs `masks` into a single `width` x `height` mask. No masks yields an
/// all-background mask.
pub fn combine_masks<'a>(
    masks: impl IntoIterator<Item = &'a BoolMask>,
    width: u32,
    height: u32,
) -> PipelineResult<BoolMask> {
    let mut combined = BoolMask::new(width, height);
    for mask in masks {
        if mask.dimensions() != (width, height) {
            return Err(PipelineError::shape_mismatch((width, height), mask.dimensions()));
        }
        combined.union_with(mask)?;
    }
    Ok(combined)
}

pub fn composite_rgba(image: &RgbImage, mask: &BoolMask) -> PipelineResult<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(PipelineError::shape_mismatch(
            image.dimensions(),
            mask.dimensions(),
        ));
    }
    let mut out = RgbaImage::new(image.width(), image.height());
    for ((pixel, src), keep) in out.pixels_mut().zip(image.pixels()).zip(mask.bits()) {
        *pixel = if *keep {
            Rgba([src[0], src[1], src[2], 255])
        } else {
            Rgba([0, 0, 0, 0])
        };
    }
    Ok(out)
}

/// Writes masked frames into a masks directory, always as PNG.
pub struct MaskCompositor {
    output_dir: PathBuf,
}

impl MaskCompositor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Combines `masks` over the frame at `index` and saves the RGBA result as
    /// `frame_<index>.png`. Returns the written path.
    pub fn write<'a>(
        &self,
        index: usize,
        image: &RgbImage,
        masks: impl IntoIterator<Item = &'a BoolMask>,
    ) -> PipelineResult<PathBuf> {
        let combined = combine_masks(masks, image.width(), image.height())?;
        let rgba = composite_rgba(image, &combined)?;
        let path = self.output_dir.join(frame_file_name(index, MASK_EXTENSION));
        rgba.save(&path)?;
        Ok(path)
    }
}
