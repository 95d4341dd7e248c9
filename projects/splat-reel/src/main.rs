mod cli;
mod error;
mod pipeline;
mod playback;
mod reconstruction;
mod run_artifacts;
mod run_context;
mod segmentation;
mod sidecar;
mod video;

use anyhow::{Context, Result};
use cli::{Args, Command, ExtractArgs, MaskArgs, PlayArgs, ReconstructArgs, RunArgs};
use pipeline::masking::{mask_video, masking_interval};
use pipeline::orchestrator::{ExternalBackends, PipelineCoordinator, PipelineRequest};
use pipeline::reconstruct::{check_inputs, reconstruct_sequence};
use playback::player::PlaybackSettings;
use playback::render::RenderSettings;
use playback::PlayOptions;
use reconstruction::SidecarModel;
use segmentation::SidecarPredictor;
use video::extractor::extract_video;
use video::open_reader;
use video::sampler::validate_target;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Extract(args) => extract(args),
        Command::Mask(args) => mask(args),
        Command::Reconstruct(args) => reconstruct(args),
        Command::Run(args) => run(args),
        Command::Play(args) => play(args),
    }
}

fn extract(args: ExtractArgs) -> Result<()> {
    let report = extract_video(
        &args.source.video_source(),
        args.source.backend,
        args.source.source_fps,
        args.target_fps,
        &args.output,
        args.image_ext,
    )?;
    tracing::info!(
        "Saved {} of {} frames (interval {}) to {}",
        report.saved_frames,
        report.decoded_frames,
        report.interval,
        args.output.display()
    );
    Ok(())
}

fn mask(args: MaskArgs) -> Result<()> {
    validate_target(args.target_fps)?;
    if args.frames.as_deref() == Some(args.output.as_path()) {
        anyhow::bail!(
            "Masks must not be written into the frames directory {}",
            args.output.display()
        );
    }

    let source = args.source.video_source();
    let mut reader = open_reader(&source, args.source.backend, args.source.source_fps)?;
    let interval = masking_interval(args.frames.as_deref(), reader.source_fps(), args.target_fps)?;
    let prompt = args.prompt.to_prompt();

    let mut predictor = SidecarPredictor::spawn(&args.segmenter.command())?;
    let report = mask_video(
        &mut predictor,
        source.path(),
        &prompt,
        reader.as_mut(),
        interval,
        &args.output,
    )?;
    tracing::info!(
        "Wrote {} masked frames to {} ({} skipped)",
        report.masks_written,
        args.output.display(),
        report.skipped_frames
    );
    Ok(())
}

fn reconstruct(args: ReconstructArgs) -> Result<()> {
    if args.frames == args.masks {
        anyhow::bail!(
            "Frames and masks must live in separate directories, both are {}",
            args.frames.display()
        );
    }
    // Fail before the model is loaded
    check_inputs(&args.frames, &args.masks)?;

    let mut model = SidecarModel::load(&args.reconstructor.command(), &args.reconstructor.config)?;
    let report = reconstruct_sequence(
        &mut model,
        &args.frames,
        &args.masks,
        &args.output,
        args.reconstructor.seed,
        args.ledger.as_deref(),
    )?;
    tracing::info!(
        "Reconstructed {} of {} frames into {} ({} skipped)",
        report.reconstructed,
        report.frames_requested,
        args.output.display(),
        report.skipped()
    );
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    validate_target(args.target_fps)?;
    let source = args.source.video_source();
    let prompt = args.prompt.to_prompt();

    let (layout, metadata) = run_context::create_run(
        &args.output_root,
        source.path(),
        &prompt,
        args.target_fps,
        args.reconstructor.seed,
        args.force,
    )?;
    tracing::info!("Run {} in {}", metadata.run_id, layout.root.display());

    let backends = ExternalBackends {
        decoder: args.source.backend,
        fps_override: args.source.source_fps,
        segmenter: args.segmenter.command(),
        reconstructor: args.reconstructor.command(),
        reconstruction_config: args.reconstructor.config.clone(),
    };
    let request = PipelineRequest {
        source,
        prompt,
        target_fps: args.target_fps,
        seed: args.reconstructor.seed,
        frame_format: args.image_ext,
    };

    let coordinator = PipelineCoordinator::new(backends, layout);
    coordinator
        .run(&request)
        .with_context(|| format!("Run {} failed", metadata.run_id))?;
    tracing::info!("Splats are in {}", coordinator.layout().splats_dir.display());
    Ok(())
}

fn play(args: PlayArgs) -> Result<()> {
    if !(args.fps.is_finite() && args.fps > 0.0) {
        anyhow::bail!("Playback fps must be positive, got {}", args.fps);
    }
    if args.width == 0 || args.height == 0 || args.point_size == 0 {
        anyhow::bail!("Width, height and point size must be non-zero");
    }

    let settings = PlaybackSettings {
        render: RenderSettings {
            width: args.width,
            height: args.height,
            point_size: args.point_size,
            ..RenderSettings::default()
        },
        fps: args.fps,
        // Headless recording has nobody watching
        realtime: !args.headless,
    };
    let options = PlayOptions {
        splats_dir: args.splats,
        output: args.output,
        view_in: args.view_in,
        view_out: args.view_out,
        headless: args.headless,
        settings,
    };
    playback::play(&options)?;
    Ok(())
}
