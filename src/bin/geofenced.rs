//! geofenced - cattle boundary monitor
//!
//! This daemon:
//! 1. Loads configuration (file from GEOFENCE_CONFIG, GEOFENCE_* env, CLI flags)
//! 2. Opens the detector and the frame source; either failing is fatal
//! 3. Opens the alert store, degrading to no persistence if it is unavailable
//! 4. Runs the boundary monitor until end of input or Ctrl-C
//! 5. Prints the monitoring summary

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "backend-tract")]
use cattle_geofence::{IouTracker, TractBackend};
use cattle_geofence::{
    detect::DetectionCapability, open_source, AlertDispatcher, BackendRegistry, BoundaryMonitor,
    DetectorBackend, GeofenceConfig, IdentityMode, MonitorSession, SourceSettings,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor a pasture feed for cattle crossing the boundary line")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "GEOFENCE_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source: camera:N, /dev/videoN, stub://name?frames=N or a video file.
    #[arg(long)]
    source: Option<String>,
    /// ONNX detector weights.
    #[arg(long)]
    model: Option<String>,
    /// Boundary line, in pixels from the top of the frame.
    #[arg(long)]
    boundary_y: Option<u32>,
    #[arg(long)]
    confidence: Option<f32>,
    /// Only evaluate detections with this label (e.g. "cow").
    #[arg(long)]
    class_filter: Option<String>,
    /// Minimum seconds between two alerts for the same animal.
    #[arg(long)]
    cooldown_secs: Option<f64>,
    /// Key animals by their position in each frame instead of tracker ids.
    #[arg(long)]
    frame_index_ids: bool,
    /// Suppress repeated alerts until the animal has returned to the safe side.
    #[arg(long)]
    strict_alternation: bool,
    #[arg(long)]
    no_persistence: bool,
    #[arg(long)]
    camera_label: Option<String>,
    /// Nominal frame rate requested from the source.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    fps: u32,
    /// Directory for annotated JPEGs of alert frames.
    #[cfg(feature = "snapshots")]
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };
    log::info!(
        "boundary at y={} (confidence >= {}, cooldown {:?})",
        cfg.boundary_y,
        cfg.confidence_threshold,
        cfg.alert_cooldown
    );

    let detector = {
        let mut stage = ui.stage("Load detector");
        build_detector(&cfg).inspect_err(|_| stage.fail())?
    };
    let mut source = {
        let mut stage = ui.stage("Open frame source");
        let settings = SourceSettings {
            target_fps: args.fps,
            ..SourceSettings::default()
        };
        open_source(&cfg.source, settings).inspect_err(|_| stage.fail())?
    };
    let dispatcher = {
        let _stage = ui.stage("Open alert store");
        AlertDispatcher::open(&cfg.persistence, &cfg.camera_label)
    };

    let monitor = BoundaryMonitor::new(cfg.monitor_settings());
    let session = MonitorSession::new(detector, monitor, dispatcher)
        .with_confidence_threshold(cfg.confidence_threshold);
    #[cfg(feature = "snapshots")]
    let session = match &args.snapshot_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            session.with_snapshot_dir(dir.clone())
        }
        None => session,
    };
    let mut session = session;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    log::info!("monitoring {} (Ctrl-C to stop)", cfg.source);
    let summary = session.run(source.as_mut(), &stop)?;
    println!("\n{}", summary);
    Ok(())
}

fn load_config(args: &Args) -> Result<GeofenceConfig> {
    let mut cfg = GeofenceConfig::load_from(args.config.as_deref())?;
    if let Some(source) = &args.source {
        cfg.source = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.model_path = model.clone();
    }
    if let Some(y) = args.boundary_y {
        cfg.boundary_y = y;
    }
    if let Some(conf) = args.confidence {
        cfg.confidence_threshold = conf;
    }
    if let Some(label) = &args.class_filter {
        cfg.class_filter = Some(label.clone());
    }
    if let Some(secs) = args.cooldown_secs {
        cfg.alert_cooldown = Some(
            Duration::try_from_secs_f64(secs)
                .map_err(|_| anyhow!("--cooldown-secs must be a finite number >= 0"))?,
        );
    }
    if args.frame_index_ids {
        cfg.identity_mode = IdentityMode::FrameIndex;
    }
    if args.strict_alternation {
        cfg.strict_alternation = true;
    }
    if args.no_persistence {
        cfg.persistence.enabled = false;
    }
    if let Some(label) = &args.camera_label {
        cfg.camera_label = label.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_detector(cfg: &GeofenceConfig) -> Result<Box<dyn DetectorBackend>> {
    if !Path::new(&cfg.model_path).is_file() {
        return Err(anyhow!("model not found: {}", cfg.model_path));
    }

    #[allow(unused_mut)]
    let mut registry = BackendRegistry::new();
    #[cfg(feature = "backend-tract")]
    {
        let tract =
            TractBackend::new(&cfg.model_path)?.with_threshold(cfg.confidence_threshold);
        registry.register(IouTracker::new(tract, cfg.tracker));
    }

    let capability = match cfg.identity_mode {
        IdentityMode::Tracked => DetectionCapability::Tracking,
        IdentityMode::FrameIndex => DetectionCapability::ObjectDetection,
    };
    let name = registry.name_for_capability(capability).map_err(|e| {
        anyhow!(
            "{} (available: {:?}); rebuild with --features backend-tract",
            e,
            registry.list()
        )
    })?;
    log::info!("detector backend: {}", name);
    registry.take(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fps_is_a_usage_error() {
        assert!(Args::try_parse_from(["geofenced", "--fps", "0"]).is_err());
        let args = Args::try_parse_from(["geofenced", "--fps", "1"]).expect("fps 1 parses");
        assert_eq!(args.fps, 1);
    }
}
