// Run artifact naming and persisted records
//
// Frame and mask rasters share `frame_<6-digit index>`; splats are
// `splat_<3-digit ordinal>.ply`. Records in this module are persisted as JSON
// within a run's directories.

use crate::error::PipelineResult;
use crate::video::sampler::FrameInterval;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const FRAME_PREFIX: &str = "frame_";
pub const SPLAT_PREFIX: &str = "splat_";
pub const SPLAT_EXTENSION: &str = "ply";
pub const MASK_EXTENSION: &str = "png";
pub const SAMPLING_RECORD: &str = "sampling.json";

pub fn frame_file_name(index: usize, extension: &str) -> String {
    format!("{FRAME_PREFIX}{index:06}.{extension}")
}

pub fn splat_file_name(ordinal: usize) -> String {
    format!("{SPLAT_PREFIX}{ordinal:03}.{SPLAT_EXTENSION}")
}

/// The numeric part of `<prefix><digits>.<ext>`, if `name` has that shape.
pub fn parse_artifact_number(name: &str, prefix: &str) -> Option<usize> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    let digits = stem.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// An artifact file found on disk with its parsed index or ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub number: usize,
    pub path: PathBuf,
}

impl ArtifactEntry {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lists `<prefix>NNN.<ext>` files directly inside `dir`, ordered by number.
/// `extensions` of `None` accepts any extension.
pub fn list_artifacts(
    dir: &Path,
    prefix: &str,
    extensions: Option<&[&str]>,
) -> PipelineResult<Vec<ArtifactEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let matches_ext = match extensions {
            None => true,
            Some(exts) => path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| exts.iter().any(|e| e.eq_ignore_ascii_case(s)))
                .unwrap_or(false),
        };
        if !matches_ext {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(number) = parse_artifact_number(name, prefix) {
            entries.push(ArtifactEntry { number, path });
        }
    }

    entries.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
    Ok(entries)
}

pub fn list_splats(dir: &Path) -> PipelineResult<Vec<ArtifactEntry>> {
    list_artifacts(dir, SPLAT_PREFIX, Some(&[SPLAT_EXTENSION]))
}

/// Creates a stage's output directory and removes artifacts a previous run of
/// the same stage left behind. Returns how many were removed.
pub fn prepare_stage_dir(dir: &Path, prefix: &str) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let stale = list_artifacts(dir, prefix, None)?;
    for entry in &stale {
        fs::remove_file(&entry.path)
            .with_context(|| format!("Failed to remove stale {}", entry.path.display()))?;
    }
    if !stale.is_empty() {
        tracing::info!(
            "Removed {} stale {}* artifacts from {}",
            stale.len(),
            prefix,
            dir.display()
        );
    }
    Ok(stale.len())
}

/// Sampling decision recorded next to the extracted frames so later stages,
/// possibly in another process, reuse the same interval.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SamplingRecord {
    pub source_fps: f64,
    pub target_fps: Option<f64>,
    pub interval: FrameInterval,
    pub decoded_frames: usize,
    pub saved_frames: usize,
    pub image_extension: String,
}

impl SamplingRecord {
    pub fn save(&self, frames_dir: &Path) -> Result<()> {
        let path = frames_dir.join(SAMPLING_RECORD);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load(frames_dir: &Path) -> Result<Option<Self>> {
        let path = frames_dir.join(SAMPLING_RECORD);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Invalid sampling record {}", path.display()))?;
        Ok(Some(record))
    }
}

/// Normalized bounding box, used for visual prompts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl std::str::FromStr for BBox {
    type Err = String;

    /// Parses `x,y,w,h` in normalized [0, 1] coordinates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid box '{s}': {e}"))?;
        let &[x, y, w, h] = &parts[..] else {
            return Err(format!("box '{s}' must have 4 components"));
        };
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(x) && in_unit(y) && w > 0.0 && h > 0.0 && in_unit(x + w) && in_unit(y + h)) {
            return Err(format!("box '{s}' is not inside the unit square"));
        }
        Ok(Self { x, y, w, h })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_fixed_width() {
        assert_eq!(frame_file_name(0, "png"), "frame_000000.png");
        assert_eq!(frame_file_name(1234, "jpg"), "frame_001234.jpg");
        assert_eq!(splat_file_name(0), "splat_000.ply");
        assert_eq!(splat_file_name(42), "splat_042.ply");
        assert_eq!(splat_file_name(1000), "splat_1000.ply");
    }

    #[test]
    fn test_parse_artifact_numbers() {
        assert_eq!(parse_artifact_number("frame_000120.png", FRAME_PREFIX), Some(120));
        assert_eq!(parse_artifact_number("frame_000120.jpg", FRAME_PREFIX), Some(120));
        assert_eq!(parse_artifact_number("splat_007.ply", SPLAT_PREFIX), Some(7));
        assert_eq!(parse_artifact_number("frame_.png", FRAME_PREFIX), None);
        assert_eq!(parse_artifact_number("frame_12a.png", FRAME_PREFIX), None);
        assert_eq!(parse_artifact_number("sampling.json", FRAME_PREFIX), None);
    }

    #[test]
    fn test_listing_orders_numerically_past_the_pad_width() {
        let dir = tempfile::tempdir().unwrap();
        for ordinal in [101, 1000, 2, 999] {
            fs::write(dir.path().join(splat_file_name(ordinal)), b"").unwrap();
        }
        fs::write(dir.path().join("splat_notes.txt"), b"").unwrap();

        let numbers: Vec<usize> = list_splats(dir.path())
            .unwrap()
            .iter()
            .map(|e| e.number)
            .collect();
        assert_eq!(numbers, vec![2, 101, 999, 1000]);
    }

    #[test]
    fn test_prepare_stage_dir_clears_only_its_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("splats");
        fs::create_dir_all(&stage).unwrap();
        fs::write(stage.join("splat_000.ply"), b"old").unwrap();
        fs::write(stage.join("readme.md"), b"keep").unwrap();

        assert_eq!(prepare_stage_dir(&stage, SPLAT_PREFIX).unwrap(), 1);
        assert!(!stage.join("splat_000.ply").exists());
        assert!(stage.join("readme.md").exists());

        // Creates missing directories
        let fresh = dir.path().join("frames");
        assert_eq!(prepare_stage_dir(&fresh, FRAME_PREFIX).unwrap(), 0);
        assert!(fresh.is_dir());
    }

    #[test]
    fn test_sampling_record_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SamplingRecord::load(dir.path()).unwrap().is_none());

        let record = SamplingRecord {
            source_fps: 240.0,
            target_fps: Some(2.0),
            interval: crate::video::sampler::compute_interval(240.0, Some(2.0)).unwrap(),
            decoded_frames: 960,
            saved_frames: 8,
            image_extension: "png".to_string(),
        };
        record.save(dir.path()).unwrap();
        assert_eq!(SamplingRecord::load(dir.path()).unwrap(), Some(record));
    }

    #[test]
    fn test_bbox_parsing() {
        let b: BBox = "0.1, 0.2, 0.5, 0.5".parse().unwrap();
        assert_eq!(b, BBox { x: 0.1, y: 0.2, w: 0.5, h: 0.5 });
        assert!("0.1,0.2,0.5".parse::<BBox>().is_err());
        assert!("0.8,0.2,0.5,0.5".parse::<BBox>().is_err());
        assert!("a,b,c,d".parse::<BBox>().is_err());
    }
}
