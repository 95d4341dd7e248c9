// Software point rasterizer
//
// One `Renderable` lives for a whole playback; each splat replaces its point
// data in place. Points are drawn as square sprites with a depth test.

use super::camera::CameraViewpoint;
use crate::reconstruction::ply::PointCloud;
use image::{Rgb, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Sprite edge in pixels.
    pub point_size: u32,
    pub background: [u8; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            point_size: 2,
            background: [0, 0, 0],
        }
    }
}

/// Point geometry shared across frames.
#[derive(Debug, Default)]
pub struct Renderable {
    positions: Vec<[f32; 3]>,
    colors: Vec<[u8; 3]>,
    generation: usize,
}

impl Renderable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces positions and colors, reusing the existing buffers.
    pub fn update_geometry(&mut self, cloud: &PointCloud) {
        self.positions.clear();
        self.positions.extend_from_slice(&cloud.positions);
        self.colors.clear();
        self.colors.extend_from_slice(&cloud.colors);
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of geometry updates so far.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

pub struct Rasterizer {
    settings: RenderSettings,
    frame: RgbImage,
    depth: Vec<f32>,
}

impl Rasterizer {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            frame: RgbImage::new(settings.width, settings.height),
            depth: vec![f32::INFINITY; (settings.width as usize) * (settings.height as usize)],
            settings,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Draws `renderable` as seen from `viewpoint` and returns the frame.
    pub fn render(&mut self, renderable: &Renderable, viewpoint: &CameraViewpoint) -> &RgbImage {
        let RenderSettings {
            width,
            height,
            point_size,
            background,
        } = self.settings;

        for pixel in self.frame.pixels_mut() {
            *pixel = Rgb(background);
        }
        self.depth.fill(f32::INFINITY);

        let projector = viewpoint.projector(width, height);
        let size = point_size.max(1) as i64;
        let half = (size - 1) / 2;

        for (position, color) in renderable.positions.iter().zip(&renderable.colors) {
            let Some((x, y, z)) = projector.project(*position) else {
                continue;
            };
            let (cx, cy) = (x.floor() as i64, y.floor() as i64);
            for py in (cy - half)..(cy - half + size) {
                if py < 0 || py >= height as i64 {
                    continue;
                }
                for px in (cx - half)..(cx - half + size) {
                    if px < 0 || px >= width as i64 {
                        continue;
                    }
                    let offset = (py as usize) * (width as usize) + px as usize;
                    if z < self.depth[offset] {
                        self.depth[offset] = z;
                        self.frame.put_pixel(px as u32, py as u32, Rgb(*color));
                    }
                }
            }
        }

        &self.frame
    }
}
