use crate::video::sampler::FrameInterval;
use crate::video::VideoReader;
use anyhow::Result;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    pub decoded_frames: usize,
    pub kept_frames: usize,
    pub duration: Duration,
}

/// A decoded frame that survived sampling, tagged with its decode-order index.
pub struct SampledFrame {
    pub index: usize,
    pub image: RgbImage,
}

/// A trait for handling kept frames. This separates the "what to do with a frame"
/// from the "how to decode and sample" logic.
pub trait FrameProcessor {
    fn process(&mut self, frame: SampledFrame) -> Result<()>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(SampledFrame) -> Result<()>,
{
    fn process(&mut self, frame: SampledFrame) -> Result<()> {
        self(frame)
    }
}

pub fn stage_progress_bar(len: Option<usize>, stage: &str) -> ProgressBar {
    let pb = match len {
        Some(len) => ProgressBar::new(len as u64),
        None => ProgressBar::new_spinner(),
    };
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{prefix:.bold} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow}, {eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(stage.to_string());
    pb
}

/// Decodes `reader` to the end of the stream and hands every kept frame to
/// `processor`. This is the only place sampling decisions are applied.
pub fn process_sampled<P>(
    reader: &mut dyn VideoReader,
    interval: FrameInterval,
    stage: &str,
    mut processor: P,
) -> Result<ProcessingStats>
where
    P: FrameProcessor,
{
    let start_time = Instant::now();
    let pb = stage_progress_bar(reader.frame_count_hint(), stage);

    let mut index = 0;
    let mut kept_frames = 0;
    while let Some(image) = reader.next_frame()? {
        if interval.is_kept(index) {
            processor.process(SampledFrame { index, image })?;
            kept_frames += 1;
        }
        index += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");

    Ok(ProcessingStats {
        decoded_frames: index,
        kept_frames,
        duration: start_time.elapsed(),
    })
}
