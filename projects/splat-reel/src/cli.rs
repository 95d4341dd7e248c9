use crate::run_artifacts::BBox;
use crate::segmentation::Prompt;
use crate::sidecar::SidecarCommand;
use crate::video::extractor::FrameFormat;
use crate::video::{DecoderBackend, VideoSource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a video and save the sampled frames
    Extract(ExtractArgs),
    /// Segment the prompted subject and write masked RGBA frames
    Mask(MaskArgs),
    /// Reconstruct one splat per masked frame
    Reconstruct(ReconstructArgs),
    /// Extract, mask and reconstruct into a new run directory
    Run(RunArgs),
    /// Replay a splat sequence from a fixed viewpoint and record it
    Play(PlayArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SourceArgs {
    /// Video file or folder of numbered frames
    pub source: PathBuf,

    /// Decoder for video files
    #[arg(long, value_enum, default_value_t = DecoderBackend::Opencv, env = "SPLAT_REEL_BACKEND")]
    pub backend: DecoderBackend,

    /// Frame rate to assume instead of the container's (required for folders)
    #[arg(long)]
    pub source_fps: Option<f64>,
}

impl SourceArgs {
    pub fn video_source(&self) -> VideoSource {
        VideoSource::from_path(&self.source)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct PromptArgs {
    /// Text prompt naming the subject
    #[arg(long, required_unless_present = "bbox", conflicts_with = "bbox")]
    pub prompt: Option<String>,

    /// Box prompt on the first frame as normalized x,y,w,h
    #[arg(long)]
    pub bbox: Option<BBox>,
}

impl PromptArgs {
    pub fn to_prompt(&self) -> Prompt {
        match (&self.prompt, self.bbox) {
            (Some(text), _) => Prompt::text(text.clone()),
            (None, Some(bbox)) => Prompt::Box { bbox },
            // clap enforces one of the two
            (None, None) => Prompt::text(String::new()),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct SegmenterArgs {
    /// Segmentation sidecar executable
    #[arg(long, env = "SPLAT_REEL_SEGMENTER")]
    pub segmenter: PathBuf,

    /// Extra argument for the segmentation sidecar (repeatable)
    #[arg(long = "segmenter-arg", allow_hyphen_values = true)]
    pub segmenter_args: Vec<String>,
}

impl SegmenterArgs {
    pub fn command(&self) -> SidecarCommand {
        SidecarCommand::new(&self.segmenter).with_args(self.segmenter_args.clone())
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReconstructorArgs {
    /// Reconstruction sidecar executable
    #[arg(long, env = "SPLAT_REEL_RECONSTRUCTOR")]
    pub reconstructor: PathBuf,

    /// Extra argument for the reconstruction sidecar (repeatable)
    #[arg(long = "reconstructor-arg", allow_hyphen_values = true)]
    pub reconstructor_args: Vec<String>,

    /// Model configuration handed to the reconstruction sidecar
    #[arg(long, env = "SPLAT_REEL_RECONSTRUCTION_CONFIG")]
    pub config: PathBuf,

    /// Seed forwarded to every reconstruction
    #[arg(long, default_value_t = 42, env = "SPLAT_REEL_SEED")]
    pub seed: u64,
}

impl ReconstructorArgs {
    pub fn command(&self) -> SidecarCommand {
        SidecarCommand::new(&self.reconstructor).with_args(self.reconstructor_args.clone())
    }
}

#[derive(clap::Args, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory for the extracted frames
    #[arg(long)]
    pub output: PathBuf,

    /// Sampling rate; omit to keep every frame
    #[arg(long)]
    pub target_fps: Option<f64>,

    #[arg(long, value_enum, default_value_t = FrameFormat::Png)]
    pub image_ext: FrameFormat,
}

#[derive(clap::Args, Debug)]
pub struct MaskArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub prompt: PromptArgs,

    #[command(flatten)]
    pub segmenter: SegmenterArgs,

    /// Extracted frames directory whose sampling record fixes the interval
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Directory for the masked frames
    #[arg(long)]
    pub output: PathBuf,

    /// Sampling rate, only used without a sampling record
    #[arg(long)]
    pub target_fps: Option<f64>,
}

#[derive(clap::Args, Debug)]
pub struct ReconstructArgs {
    #[command(flatten)]
    pub reconstructor: ReconstructorArgs,

    /// Extracted frames directory
    #[arg(long)]
    pub frames: PathBuf,

    /// Masked frames directory
    #[arg(long)]
    pub masks: PathBuf,

    /// Directory for the splats
    #[arg(long)]
    pub output: PathBuf,

    /// Per-frame outcome CSV
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub prompt: PromptArgs,

    #[command(flatten)]
    pub segmenter: SegmenterArgs,

    #[command(flatten)]
    pub reconstructor: ReconstructorArgs,

    /// Root directory for run outputs
    #[arg(long, env = "SPLAT_REEL_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    #[arg(long)]
    pub target_fps: Option<f64>,

    #[arg(long, value_enum, default_value_t = FrameFormat::Png)]
    pub image_ext: FrameFormat,

    /// Rerun into an existing run directory
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// Directory of splat_NNN.ply files
    pub splats: PathBuf,

    /// Output video path
    #[arg(long)]
    pub output: PathBuf,

    /// Use a saved viewpoint instead of picking one
    #[arg(long)]
    pub view_in: Option<PathBuf>,

    /// Save the frozen viewpoint here
    #[arg(long)]
    pub view_out: Option<PathBuf>,

    /// Record without opening a window
    #[arg(long)]
    pub headless: bool,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    #[arg(long, default_value_t = 5.0)]
    pub fps: f64,

    /// Point sprite size in pixels
    #[arg(long, default_value_t = 2)]
    pub point_size: u32,
}
