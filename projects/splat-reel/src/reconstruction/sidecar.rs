// Reconstruction model hosted in a sidecar process
//
// The sidecar loads its checkpoint once, then answers one `infer` per frame by
// writing a PLY file where it was told to. Inputs and outputs pass through a
// scratch directory owned by this process.

use super::ply::PlyTable;
use super::ReconstructionModel;
use crate::error::{PipelineError, PipelineResult};
use crate::segmentation::mask::BoolMask;
use crate::sidecar::{JsonLines, SidecarCommand, SidecarProcess};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const RECONSTRUCTOR: &str = "reconstructor";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconstructionRequest {
    Load {
        config_path: PathBuf,
    },
    Infer {
        image_path: PathBuf,
        mask_path: PathBuf,
        seed: u64,
        output_path: PathBuf,
    },
    Shutdown,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconstructionResponse {
    Loaded,
    Artifact { path: PathBuf },
    Error { message: String },
}

fn unexpected(response: ReconstructionResponse, wanted: &str) -> PipelineError {
    match response {
        ReconstructionResponse::Error { message } => PipelineError::sidecar(RECONSTRUCTOR, message),
        other => PipelineError::sidecar(RECONSTRUCTOR, format!("expected {wanted}, got {other:?}")),
    }
}

pub fn load_config<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    config_path: &Path,
) -> PipelineResult<()> {
    let request = ReconstructionRequest::Load {
        config_path: config_path.to_path_buf(),
    };
    match channel.request(&request)? {
        ReconstructionResponse::Loaded => Ok(()),
        other => Err(unexpected(other, "loaded")),
    }
}

/// Asks for one reconstruction and parses the PLY the sidecar reports.
pub fn infer_artifact<R: BufRead, W: Write>(
    channel: &mut JsonLines<R, W>,
    request: &ReconstructionRequest,
) -> PipelineResult<PlyTable> {
    match channel.request(request)? {
        ReconstructionResponse::Artifact { path } => {
            let table = PlyTable::from_file(&path)?;
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!("Could not remove sidecar output {}: {}", path.display(), e);
            }
            Ok(table)
        }
        other => Err(unexpected(other, "artifact")),
    }
}

pub struct SidecarModel {
    process: SidecarProcess,
    scratch: TempDir,
    requests: usize,
    shut_down: bool,
}

impl SidecarModel {
    /// Validates `config_path`, spawns the sidecar and loads the model once.
    pub fn load(command: &SidecarCommand, config_path: &Path) -> PipelineResult<Self> {
        if !config_path.exists() {
            return Err(PipelineError::PathNotFound(config_path.to_path_buf()));
        }
        let scratch = tempfile::Builder::new().prefix("splat-reel-").tempdir()?;
        let mut process = SidecarProcess::spawn(RECONSTRUCTOR, command)?;
        load_config(process.channel(), config_path)?;
        tracing::info!("Reconstruction model loaded from {}", config_path.display());
        Ok(Self {
            process,
            scratch,
            requests: 0,
            shut_down: false,
        })
    }
}

impl ReconstructionModel for SidecarModel {
    fn infer(&mut self, image: &RgbaImage, mask: &BoolMask, seed: u64) -> PipelineResult<PlyTable> {
        let n = self.requests;
        self.requests += 1;
        let image_path = self.scratch.path().join(format!("image_{n}.png"));
        let mask_path = self.scratch.path().join(format!("mask_{n}.png"));
        image.save(&image_path)?;
        mask.to_luma().save(&mask_path)?;

        let request = ReconstructionRequest::Infer {
            image_path: image_path.clone(),
            mask_path: mask_path.clone(),
            seed,
            output_path: self.scratch.path().join(format!("output_{n}.ply")),
        };
        let result = infer_artifact(self.process.channel(), &request);
        let _ = std::fs::remove_file(&image_path);
        let _ = std::fs::remove_file(&mask_path);
        result
    }

    fn shutdown(&mut self) -> PipelineResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.process.channel().send(&ReconstructionRequest::Shutdown)?;
        self.process.wait()
    }
}
