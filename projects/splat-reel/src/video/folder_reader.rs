use super::VideoReader;
use crate::error::{PipelineError, PipelineResult};
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Reads an ordered folder of still images as if it were a video.
pub struct FolderReader {
    frames: Vec<PathBuf>,
    cursor: usize,
    fps: f64,
}

impl FolderReader {
    pub fn new(dir: &Path, fps: f64) -> PipelineResult<Self> {
        if !dir.is_dir() {
            return Err(PipelineError::source_unreadable(dir, "not a directory"));
        }
        let frames = list_folder_frames(dir);
        tracing::info!(
            "FolderReader: {} images in {}, fps={:.2}",
            frames.len(),
            dir.display(),
            fps
        );
        Ok(Self {
            frames,
            cursor: 0,
            fps,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| IMAGE_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files of `dir`, numerically ordered when every stem is a number and
/// lexically ordered otherwise.
pub fn list_folder_frames(dir: &Path) -> Vec<PathBuf> {
    let mut frames: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image(p))
        .collect();

    let numeric: Option<Vec<u64>> = frames
        .iter()
        .map(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
        })
        .collect();

    match numeric {
        Some(keys) => {
            let mut keyed: Vec<(u64, PathBuf)> = keys.into_iter().zip(frames).collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            keyed.into_iter().map(|(_, p)| p).collect()
        }
        None => {
            frames.sort();
            frames
        }
    }
}

impl VideoReader for FolderReader {
    fn source_fps(&self) -> f64 {
        self.fps
    }

    fn frame_count_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<RgbImage>> {
        let Some(path) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|e| PipelineError::source_unreadable(path, e))?
            .to_rgb8();
        self.cursor += 1;
        Ok(Some(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn touch_image(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(2, 2, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_numeric_names_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for (name, v) in [("10.png", 10), ("2.png", 2), ("1.png", 1)] {
            touch_image(dir.path(), name, v);
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<String> = list_folder_frames(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.png", "2.png", "10.png"]);
    }

    #[test]
    fn test_mixed_names_sort_lexically() {
        let dir = tempfile::tempdir().unwrap();
        for (name, v) in [("b_10.png", 10), ("b_2.png", 2), ("a.png", 1)] {
            touch_image(dir.path(), name, v);
        }
        let names: Vec<String> = list_folder_frames(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b_10.png", "b_2.png"]);
    }

    #[test]
    fn test_reader_yields_frames_in_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        touch_image(dir.path(), "0.png", 5);
        touch_image(dir.path(), "1.png", 9);

        let mut reader = FolderReader::new(dir.path(), 24.0).unwrap();
        assert_eq!(reader.source_fps(), 24.0);
        assert_eq!(reader.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 5);
        assert_eq!(reader.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 9);
        assert!(reader.next_frame().unwrap().is_none());
    }
}
