use crate::error::{PipelineError, PipelineResult};
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ObjectId = u32;

/// Per-object foreground masks for one frame.
pub type MaskSet = BTreeMap<ObjectId, BoolMask>;

/// Row-major boolean raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl BoolMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; (width as usize) * (height as usize)],
        }
    }

    #[cfg(test)]
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                mask.set(x, y, f(x, y));
            }
        }
        mask
    }

    /// Foreground wherever the single-channel value is greater than zero.
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bits: image.as_raw().iter().map(|v| *v > 0).collect(),
        }
    }

    /// Thresholds a mask artifact: its alpha channel when it has one, its luma
    /// otherwise.
    pub fn from_artifact(image: &DynamicImage) -> Self {
        if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            Self {
                width: rgba.width(),
                height: rgba.height(),
                bits: rgba.pixels().map(|p| p[3] > 0).collect(),
            }
        } else {
            Self::from_luma(&image.to_luma8())
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[self.offset(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let offset = self.offset(x, y);
        self.bits[offset] = value;
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn foreground_count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// ORs `other` into `self`. Both masks must share dimensions.
    pub fn union_with(&mut self, other: &BoolMask) -> PipelineResult<()> {
        if self.dimensions() != other.dimensions() {
            return Err(PipelineError::shape_mismatch(
                self.dimensions(),
                other.dimensions(),
            ));
        }
        for (dst, src) in self.bits.iter_mut().zip(&other.bits) {
            *dst |= *src;
        }
        Ok(())
    }

    /// 0/255 grayscale rendition, the form mask files are exchanged in.
    pub fn to_luma(&self) -> GrayImage {
        let mut image = GrayImage::new(self.width, self.height);
        for (pixel, bit) in image.pixels_mut().zip(&self.bits) {
            *pixel = Luma([if *bit { 255 } else { 0 }]);
        }
        image
    }
}

/// Run-length encoded mask as exchanged with the segmentation sidecar.
///
/// Runs are row-major and alternate background/foreground, starting with a
/// (possibly empty) background run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRle {
    /// `[height, width]`
    pub size: [u32; 2],
    pub counts: Vec<u32>,
}

impl MaskRle {
    #[cfg(test)]
    pub fn encode(mask: &BoolMask) -> Self {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u32;
        for bit in mask.bits() {
            if *bit != current {
                counts.push(run);
                current = *bit;
                run = 0;
            }
            run += 1;
        }
        counts.push(run);
        Self {
            size: [mask.height(), mask.width()],
            counts,
        }
    }

    pub fn decode(&self) -> PipelineResult<BoolMask> {
        let [height, width] = self.size;
        let expected = (width as u64) * (height as u64);
        let total: u64 = self.counts.iter().map(|c| *c as u64).sum();
        if total != expected {
            return Err(PipelineError::sidecar(
                "segmenter",
                format!("mask runs cover {total} pixels, expected {width}x{height}"),
            ));
        }

        let mut bits = Vec::with_capacity(expected as usize);
        let mut value = false;
        for count in &self.counts {
            bits.extend(std::iter::repeat(value).take(*count as usize));
            value = !value;
        }
        Ok(BoolMask {
            width,
            height,
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_union_requires_matching_shapes() {
        let mut a = BoolMask::from_fn(4, 2, |x, _| x == 0);
        let b = BoolMask::from_fn(4, 2, |x, _| x == 3);
        a.union_with(&b).unwrap();
        assert_eq!(a.foreground_count(), 4);

        let wrong = BoolMask::new(2, 2);
        assert!(matches!(
            a.union_with(&wrong),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rle_encodes_leading_background_run() {
        let mask = BoolMask::from_fn(3, 2, |x, y| y == 0 && x > 0);
        let rle = MaskRle::encode(&mask);
        assert_eq!(rle.size, [2, 3]);
        assert_eq!(rle.counts, vec![1, 2, 3]);
        assert_eq!(rle.decode().unwrap(), mask);

        // Mask starting with foreground gets an empty background run
        let full = BoolMask::from_fn(2, 2, |_, _| true);
        assert_eq!(MaskRle::encode(&full).counts, vec![0, 4]);
    }

    #[test]
    fn test_rle_rejects_wrong_pixel_total() {
        let rle = MaskRle {
            size: [2, 2],
            counts: vec![1, 2],
        };
        assert!(rle.decode().is_err());
    }

    #[test]
    fn test_rle_from_sidecar_json() {
        let rle: MaskRle = serde_json::from_str(r#"{"size":[1,4],"counts":[2,2]}"#).unwrap();
        let mask = rle.decode().unwrap();
        assert_eq!(mask.bits(), &[false, false, true, true]);
    }

    #[test]
    fn test_artifact_threshold_uses_alpha_when_present() {
        let mut rgba = RgbaImage::new(2, 1);
        // Black but opaque foreground pixel must still count
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let mask = BoolMask::from_artifact(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(mask.bits(), &[true, false]);

        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(1, 0, Luma([1]));
        let mask = BoolMask::from_artifact(&DynamicImage::ImageLuma8(gray));
        assert_eq!(mask.bits(), &[false, true]);
    }
}
