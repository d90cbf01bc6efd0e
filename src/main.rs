use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use depth_vis::{
    SessionConfig,
    driver::{SyntheticConfig, SyntheticDriver},
    pipeline::{BONES, FrameCache, Joint, Sensor, SensorEvent, bone_is_confident},
    types::{ImageFormat, Resolution},
};

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the acquisition loop against the synthetic sensor and dump frames as PNG.
#[derive(Parser, Debug)]
#[command(name = "depth-vis", version)]
struct Args {
    /// Session config (TOML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long, default_value_t = 90)]
    frames: u64,

    /// Directory the PNG files are written to
    #[arg(long, default_value = "frames")]
    output: PathBuf,

    /// Save every n-th frame
    #[arg(long, default_value_t = 30)]
    save_every: u64,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Pixel layout of the synthetic image stream (rgb24, gray8, yuv422)
    #[arg(long, default_value = "rgb24")]
    image_format: ImageFormat,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let threshold = config.confidence_threshold();

    let driver = SyntheticDriver::new(SyntheticConfig {
        resolution: Resolution::new(args.width, args.height),
        fps: args.fps,
        image_format: args.image_format,
        ..SyntheticConfig::default()
    });
    let mut sensor = Sensor::new(driver, config)?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {}", args.output.display()))?;

    let events = sensor.subscribe();
    let cache = sensor.frame_cache();
    let save_every = args.save_every.max(1);
    sensor.start()?;

    let mut last_frame = 0;
    'frames: while last_frame < args.frames {
        let batch = events.recv_latest(FRAME_TIMEOUT);
        if batch.is_empty() {
            log::error!("no frame within {FRAME_TIMEOUT:?}");
            break;
        }

        for event in batch {
            match event {
                SensorEvent::FrameUpdated { frame } => {
                    // Collapsed runs can skip over a save point.
                    let due = frame / save_every > last_frame / save_every;
                    last_frame = frame;
                    if due {
                        save_frame(&cache, &args.output, frame)?;
                        log_skeletons(&sensor, threshold);
                    }
                }
                SensorEvent::NewUser(user) => log::info!("user {user} appeared"),
                SensorEvent::UserLost(user) => log::info!("user {user} left"),
                SensorEvent::CalibrationComplete { user, status } => {
                    log::info!("user {user} calibration: {status:?}")
                }
                SensorEvent::Failed { message } => {
                    log::error!("acquisition stopped: {message}");
                    break 'frames;
                }
            }
        }
    }

    sensor.dispose()?;

    let stats = cache.stats();
    log::info!(
        "acquired {} frames, converted depth {}x, label {}x, rgb {}x",
        sensor.frames_acquired(),
        stats.depth,
        stats.label,
        stats.rgb
    );

    if last_frame == 0 {
        bail!("sensor delivered no frames");
    }
    Ok(())
}

fn save_frame(cache: &FrameCache, dir: &Path, frame: u64) -> Result<()> {
    let depth_path = dir.join(format!("depth_{frame:05}.png"));
    let label_path = dir.join(format!("label_{frame:05}.png"));
    let rgb_path = dir.join(format!("rgb_{frame:05}.png"));

    cache
        .with_depth(|img| img.save(&depth_path))?
        .with_context(|| format!("failed to write {}", depth_path.display()))?;
    cache
        .with_label(|img| img.save(&label_path))?
        .with_context(|| format!("failed to write {}", label_path.display()))?;
    cache
        .with_rgb(|img| img.save(&rgb_path))?
        .with_context(|| format!("failed to write {}", rgb_path.display()))?;

    log::info!("saved frame {frame} to {}", dir.display());
    Ok(())
}

fn log_skeletons(sensor: &Sensor, threshold: f32) {
    for (user, skeleton) in sensor.skeletons() {
        let head = skeleton.get(Joint::Head).position;
        let confident = BONES
            .iter()
            .filter(|bone| bone_is_confident(&skeleton, **bone, threshold))
            .count();
        log::info!(
            "user {user}: head at ({:.0}, {:.0}), {confident}/{} bones confident",
            head.x,
            head.y,
            BONES.len()
        );
    }
}
