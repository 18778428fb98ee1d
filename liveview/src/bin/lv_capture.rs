//! Headless capture tool.
//!
//! Runs the pipeline against the simulated or playback source, logs pipeline
//! events, and optionally collects a dark mask and saves an averaged frame
//! sequence before exiting.

use anyhow::{bail, Context, Result};
use clap::Parser;
use liveview::{CameraType, PipelineConfig, PipelineController, PipelineEvent, Severity};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture and process frames from a LiveView source")]
struct Args {
    #[arg(short, long, help = "JSON pipeline configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_parser = parse_camera,
        help = "Camera type: simulated, playback, frame_grabber or accelerated"
    )]
    camera: Option<CameraType>,

    #[arg(long, help = "Directory of raw frames for the playback source")]
    playback_dir: Option<PathBuf>,

    #[arg(
        short = 't',
        long,
        default_value = "5.0",
        help = "Seconds to run before stopping"
    )]
    duration_secs: f64,

    #[arg(long, help = "Std-dev window in frames (1-500)")]
    std_dev_n: Option<usize>,

    #[arg(long, help = "Apply two's-complement pixel remap")]
    pix_remap: bool,

    #[arg(long, help = "Collect a dark mask first and write it here")]
    collect_mask: Option<PathBuf>,

    #[arg(long, default_value = "50", help = "Frames averaged into the dark mask")]
    mask_frames: u64,

    #[arg(short, long, help = "Save a frame sequence to this file")]
    save: Option<PathBuf>,

    #[arg(short = 'n', long, default_value = "10", help = "Frames to save")]
    n_frames: u64,

    #[arg(long, default_value = "1", help = "Input frames averaged per saved frame")]
    n_avgs: u64,
}

fn parse_camera(name: &str) -> Result<CameraType, String> {
    match name {
        "simulated" => Ok(CameraType::Simulated),
        "playback" => Ok(CameraType::Playback),
        "frame_grabber" => Ok(CameraType::FrameGrabber),
        "accelerated" => Ok(CameraType::Accelerated),
        other => Err(format!("unknown camera type '{other}'")),
    }
}

/// Events that make the run exit with an error.
fn marks_failure(event: &PipelineEvent) -> bool {
    matches!(
        event,
        PipelineEvent::Error {
            severity: Severity::Fatal,
            ..
        } | PipelineEvent::MaskFailed { .. }
            | PipelineEvent::SaveFailed { .. }
    )
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(camera) = args.camera {
        config.camera = camera;
    }
    if let Some(dir) = &args.playback_dir {
        config.playback_dir = Some(dir.clone());
    }
    if let Some(n) = args.std_dev_n {
        config.std_dev_n = n;
    }
    if args.pix_remap {
        config.pix_remap = true;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.duration_secs <= 0.0 {
        bail!("--duration-secs must be positive");
    }
    let config = build_config(&args)?;

    info!("LiveView capture: {} camera", config.camera);
    let controller =
        PipelineController::start_with_backend(config).context("Failed to start pipeline")?;
    let events = controller.events();

    if let Some(mask_path) = &args.collect_mask {
        controller
            .set_mask_settings(Some(mask_path.clone()), args.mask_frames)
            .context("Invalid mask settings")?;
        controller
            .collect_mask()
            .context("Failed to start mask collection")?;
    } else if let Some(save) = &args.save {
        controller
            .save_frames(save.clone(), args.n_frames, args.n_avgs)
            .context("Failed to queue save")?;
    }

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration_secs);
    let mut failed = false;
    while controller.running() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(event) = events.recv_timeout(remaining.min(Duration::from_millis(250))) else {
            continue;
        };
        failed |= marks_failure(&event);
        match event {
            PipelineEvent::FpsUpdated(fps) => info!("{:.1} fps", fps),
            PipelineEvent::Error {
                severity: Severity::Transient,
                message,
            } => warn!("Skipped frame: {}", message),
            PipelineEvent::Error { severity, message } => {
                error!("{:?} error: {}", severity, message);
            }
            PipelineEvent::MaskCollected { frames, path } => {
                info!("Dark mask collected from {} frames ({:?})", frames, path);
                if let Some(save) = &args.save {
                    controller
                        .save_frames(save.clone(), args.n_frames, args.n_avgs)
                        .context("Failed to queue save")?;
                }
            }
            PipelineEvent::MaskFailed { error } => {
                error!("Dark mask failed: {}", error);
            }
            PipelineEvent::SaveCompleted {
                path,
                frames_written,
                dropped_frames,
            } => {
                info!(
                    "Saved {} frames to {} ({} dropped)",
                    frames_written,
                    path.display(),
                    dropped_frames
                );
                break;
            }
            PipelineEvent::SaveFailed { path, error } => {
                error!("Save to {} failed: {}", path.display(), error);
                break;
            }
            other => info!("{:?}", other),
        }
    }
    // the loop can exit on a stopped pipeline before its last error is read
    failed |= events.try_iter().any(|event| marks_failure(&event));

    if let Some(hist) = controller.histogram() {
        info!(
            "Last frame range [{:.1}, {:.1}] over {} samples",
            hist.min,
            hist.max,
            hist.total()
        );
    }
    if let Some(profile) = controller.spectral_mean() {
        info!("Spectral profile: {} bands", profile.len());
    }
    info!("Final rate {:.1} fps", controller.fps());

    controller.stop();
    controller.join();

    if failed {
        bail!("capture finished with errors");
    }
    Ok(())
}
