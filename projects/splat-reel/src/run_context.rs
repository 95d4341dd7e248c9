use crate::segmentation::Prompt;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const REPORT_FILE: &str = "report.json";
pub const LEDGER_FILE: &str = "reconstruction.csv";

/// Directory layout of one pipeline run. Each stage owns one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub frames_dir: PathBuf,
    pub masks_dir: PathBuf,
    pub splats_dir: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            frames_dir: root.join("frames"),
            masks_dir: root.join("masks"),
            splats_dir: root.join("splats"),
            root,
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub run_id: String,
    pub source: PathBuf,
    pub prompt: Prompt,
    pub target_fps: Option<f64>,
    pub seed: u64,
    pub created_at: DateTime<Utc>,
}

/// Run id derived from the source name: `clip.mp4` and a `clip/` folder both
/// give `clip`.
pub fn run_id_for(source: &Path) -> Result<String> {
    source
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid source name: {}", source.display()))
}

/// Creates `<output_root>/<run id>` and records the run's inputs in it. An
/// existing run directory is only reused when `force` is set.
pub fn create_run(
    output_root: &Path,
    source: &Path,
    prompt: &Prompt,
    target_fps: Option<f64>,
    seed: u64,
    force: bool,
) -> Result<(RunLayout, RunMetadata)> {
    let run_id = run_id_for(source)?;
    let layout = RunLayout::new(output_root.join(&run_id));
    if layout.root.exists() {
        if !force {
            return Err(anyhow::anyhow!(
                "Output directory already exists for: {} (use --force to rerun)",
                run_id
            ));
        }
        match load_metadata(&layout) {
            Ok(previous) => tracing::warn!(
                "Rerunning {} over the run created {}",
                run_id,
                previous.created_at
            ),
            Err(_) => tracing::warn!("Rerunning {} over a directory without metadata", run_id),
        }
    }

    fs::create_dir_all(&layout.root)?;

    let metadata = RunMetadata {
        run_id,
        source: source.to_path_buf(),
        prompt: prompt.clone(),
        target_fps,
        seed,
        created_at: Utc::now(),
    };

    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(layout.metadata_path(), content)?;

    Ok((layout, metadata))
}

pub fn load_metadata(layout: &RunLayout) -> Result<RunMetadata> {
    let content = fs::read_to_string(layout.metadata_path())?;
    Ok(serde_json::from_str(&content)?)
}
