//! Camera viewpoints and the orbit controller used to pick one.

use crate::error::{PipelineError, PipelineResult};
use crate::reconstruction::ply::PointCloud;
use nalgebra::{Isometry3, Matrix4, Perspective3, Point3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::path::Path;

const ORBIT_STEP: f32 = 0.08;
const ZOOM_STEP: f32 = 1.15;
const MIN_PITCH: f32 = -FRAC_PI_2 + 0.05;
const MAX_PITCH: f32 = FRAC_PI_2 - 0.05;
const MIN_RADIUS: f32 = 1e-3;

/// A look-at view plus perspective projection. Once picked it is frozen and
/// reapplied to every frame of a recording.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CameraViewpoint {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov_y_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraViewpoint {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, 3.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            fov_y_deg: 60.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

impl CameraViewpoint {
    /// Default view looking down -Z at the cloud's bounding box, far enough
    /// back to fit it.
    pub fn framing(cloud: &PointCloud) -> Self {
        let mut view = Self::default();
        if cloud.is_empty() {
            return view;
        }

        let mut min = Vector3::repeat(f32::INFINITY);
        let mut max = Vector3::repeat(f32::NEG_INFINITY);
        for p in &cloud.positions {
            let p = Vector3::from(*p);
            min = min.inf(&p);
            max = max.sup(&p);
        }
        let center = (min + max) * 0.5;
        let radius = ((max - min).norm() * 0.5).max(MIN_RADIUS);
        let distance = radius / (view.fov_y_deg.to_radians() * 0.5).tan() * 1.1;

        view.target = center.into();
        view.eye = (center + Vector3::new(0.0, 0.0, distance)).into();
        view.near = (distance - radius).max(distance * 1e-3);
        view.far = distance + radius * 2.0;
        view
    }

    pub fn view(&self) -> Isometry3<f32> {
        Isometry3::look_at_rh(
            &Point3::from(self.eye),
            &Point3::from(self.target),
            &Vector3::from(self.up),
        )
    }

    pub fn projection(&self, aspect: f32) -> Perspective3<f32> {
        Perspective3::new(aspect, self.fov_y_deg.to_radians(), self.near, self.far)
    }

    pub fn projector(&self, width: u32, height: u32) -> Projector {
        let aspect = width as f32 / height.max(1) as f32;
        Projector {
            matrix: self.projection(aspect).to_homogeneous() * self.view().to_homogeneous(),
            width: width as f32,
            height: height as f32,
        }
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Saved viewpoint to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let viewpoint: Self = serde_json::from_str(&content)?;
        viewpoint.validate()?;
        Ok(viewpoint)
    }

    /// Rejects views that cannot produce a projection.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |reason: String| -> PipelineResult<()> {
            Err(PipelineError::InvalidViewpoint(reason))
        };
        let finite = |v: &[f32; 3]| v.iter().all(|c| c.is_finite());
        if !(finite(&self.eye) && finite(&self.target) && finite(&self.up)) {
            return invalid("eye, target and up must be finite".to_string());
        }
        if self.eye == self.target {
            return invalid("eye and target coincide".to_string());
        }
        if !(self.fov_y_deg > 0.0 && self.fov_y_deg < 180.0) {
            return invalid(format!("fov_y_deg {} is outside (0, 180)", self.fov_y_deg));
        }
        if !(self.near.is_finite() && self.far.is_finite() && self.near > 0.0 && self.far > self.near) {
            return invalid(format!("need 0 < near < far, got near {} far {}", self.near, self.far));
        }
        Ok(())
    }
}

/// World-to-pixel transform for a fixed viewpoint and raster size.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    matrix: Matrix4<f32>,
    width: f32,
    height: f32,
}

impl Projector {
    /// Pixel coordinates (origin top-left) and NDC depth of `point`, or `None`
    /// when it lies outside the view frustum's depth range.
    pub fn project(&self, point: [f32; 3]) -> Option<(f32, f32, f32)> {
        let clip = self.matrix * Vector4::new(point[0], point[1], point[2], 1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.xyz() / clip.w;
        if !(-1.0..=1.0).contains(&ndc.z) {
            return None;
        }
        let x = (ndc.x + 1.0) * 0.5 * self.width;
        let y = (1.0 - ndc.y) * 0.5 * self.height;
        Some((x, y, ndc.z))
    }
}

/// Yaw/pitch/radius camera orbiting a fixed target.
#[derive(Debug, Clone)]
pub struct OrbitController {
    initial: CameraViewpoint,
    yaw: f32,
    pitch: f32,
    radius: f32,
}

impl OrbitController {
    pub fn new(initial: CameraViewpoint) -> Self {
        let offset = Vector3::from(initial.eye) - Vector3::from(initial.target);
        let radius = offset.norm().max(MIN_RADIUS);
        Self {
            initial,
            yaw: offset.x.atan2(offset.z),
            pitch: (offset.y / radius).clamp(-1.0, 1.0).asin().clamp(MIN_PITCH, MAX_PITCH),
            radius,
        }
    }

    /// Rotates by whole steps; positive yaw turns right, positive pitch looks
    /// from above.
    pub fn orbit(&mut self, yaw_steps: f32, pitch_steps: f32) {
        self.yaw += yaw_steps * ORBIT_STEP;
        self.pitch = (self.pitch + pitch_steps * ORBIT_STEP).clamp(MIN_PITCH, MAX_PITCH);
    }

    /// Positive steps move closer.
    pub fn zoom(&mut self, steps: i32) {
        self.radius = (self.radius / ZOOM_STEP.powi(steps)).max(MIN_RADIUS);
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.initial);
    }

    pub fn viewpoint(&self) -> CameraViewpoint {
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let offset = Vector3::new(
            self.radius * cos_pitch * sin_yaw,
            self.radius * sin_pitch,
            self.radius * cos_pitch * cos_yaw,
        );
        let target = Vector3::from(self.initial.target);
        let eye = target + offset;
        // Keep the clip range around the target as the camera moves
        let scale = self.radius / (Vector3::from(self.initial.eye) - target).norm().max(MIN_RADIUS);
        CameraViewpoint {
            eye: eye.into(),
            up: [0.0, 1.0, 0.0],
            near: self.initial.near * scale,
            far: self.initial.far * scale,
            ..self.initial
        }
    }
}
