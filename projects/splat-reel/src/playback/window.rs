// View surfaces: an OpenCV window with keyboard orbit controls, and a headless
// stand-in for unattended recording.

use super::camera::{CameraViewpoint, OrbitController};
use super::player::ViewSurface;
use super::recorder::rgb_image_to_bgr_mat;
use super::render::{Rasterizer, Renderable};
use crate::error::{PipelineError, PipelineResult};
use image::RgbImage;
use opencv::{core, highgui, imgproc};

const HELP: &str = "a/d yaw  w/s pitch  z/x zoom  r reset  enter confirm  esc abort";
const KEY_POLL_MS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Yaw(i8),
    Pitch(i8),
    Zoom(i8),
    Reset,
    Confirm,
    Abort,
}

impl KeyAction {
    /// Maps a `wait_key` code; `None` for unbound keys and for no key at all.
    pub fn from_key(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        let action = match (code & 0xff) as u8 {
            b'a' | b'A' => Self::Yaw(-1),
            b'd' | b'D' => Self::Yaw(1),
            b'w' | b'W' => Self::Pitch(1),
            b's' | b'S' => Self::Pitch(-1),
            b'z' | b'Z' => Self::Zoom(1),
            b'x' | b'X' => Self::Zoom(-1),
            b'r' | b'R' => Self::Reset,
            b'\r' | b'\n' | b' ' | b'q' | b'Q' => Self::Confirm,
            27 => Self::Abort,
            _ => return None,
        };
        Some(action)
    }
}

pub struct HighguiSurface {
    window: String,
    open: bool,
}

impl HighguiSurface {
    pub fn new(window: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            open: false,
        }
    }

    fn ensure_open(&mut self) -> PipelineResult<()> {
        if !self.open {
            highgui::named_window(&self.window, highgui::WINDOW_AUTOSIZE)?;
            self.open = true;
        }
        Ok(())
    }

    fn show(&mut self, frame: &RgbImage, overlay: Option<&str>) -> PipelineResult<()> {
        self.ensure_open()?;
        let mut mat = rgb_image_to_bgr_mat(frame)?;
        if let Some(text) = overlay {
            imgproc::put_text(
                &mut mat,
                text,
                core::Point::new(10, 20),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                core::Scalar::new(255.0, 255.0, 255.0, 0.0),
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
        highgui::imshow(&self.window, &mat)?;
        Ok(())
    }
}

impl ViewSurface for HighguiSurface {
    fn pick_viewpoint(
        &mut self,
        first: &Renderable,
        initial: CameraViewpoint,
        rasterizer: &mut Rasterizer,
    ) -> PipelineResult<CameraViewpoint> {
        tracing::info!("Orient the camera, then confirm ({})", HELP);
        let mut orbit = OrbitController::new(initial);
        loop {
            let viewpoint = orbit.viewpoint();
            let frame = rasterizer.render(first, &viewpoint);
            self.show(frame, Some(HELP))?;

            match KeyAction::from_key(highgui::wait_key(KEY_POLL_MS)?) {
                Some(KeyAction::Yaw(step)) => orbit.orbit(step as f32, 0.0),
                Some(KeyAction::Pitch(step)) => orbit.orbit(0.0, step as f32),
                Some(KeyAction::Zoom(step)) => orbit.zoom(step as i32),
                Some(KeyAction::Reset) => orbit.reset(),
                Some(KeyAction::Confirm) => return Ok(viewpoint),
                Some(KeyAction::Abort) => return Err(PipelineError::ViewAborted),
                None => {}
            }
        }
    }

    fn present(&mut self, frame: &RgbImage) -> PipelineResult<()> {
        self.show(frame, None)?;
        // Lets the window repaint
        highgui::wait_key(1)?;
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        if self.open {
            self.open = false;
            highgui::destroy_window(&self.window)?;
        }
        Ok(())
    }
}

impl Drop for HighguiSurface {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to destroy window {}: {}", self.window, e);
        }
    }
}

/// Surface for runs without a display: accepts the initial view as is and
/// shows nothing.
#[derive(Debug, Default)]
pub struct HeadlessSurface;

impl ViewSurface for HeadlessSurface {
    fn pick_viewpoint(
        &mut self,
        _first: &Renderable,
        initial: CameraViewpoint,
        _rasterizer: &mut Rasterizer,
    ) -> PipelineResult<CameraViewpoint> {
        tracing::info!("Headless playback: using the framing viewpoint");
        Ok(initial)
    }

    fn present(&mut self, _frame: &RgbImage) -> PipelineResult<()> {
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
