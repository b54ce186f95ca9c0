//! demo - end-to-end synthetic run of the cattle geofence
//!
//! A small herd wanders up and down a synthetic pasture. Untracked boxes go
//! through the IoU tracker, the boundary monitor raises alerts, and alerts
//! land in a local SQLite store that is read back at the end.

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use cattle_geofence::{
    open_source, AlertDispatcher, AlertSink, BoundaryMonitor, BoundingBox, Detection,
    IouTracker, MonitorSession, MonitorSettings, ScriptedBackend, SourceSettings,
    SqliteAlertSink, TrackerSettings, COW_CLASS_ID, DEFAULT_CAMERA_LABEL,
};

#[path = "../ui.rs"]
mod ui;

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;
const COW_WIDTH: f32 = 60.0;
const COW_HEIGHT: f32 = 40.0;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic footage.
    #[arg(long, default_value_t = 20)]
    seconds: u64,
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    fps: u32,
    /// Number of animals in the herd.
    #[arg(long, default_value_t = 3)]
    cows: usize,
    #[arg(long, default_value_t = 300)]
    boundary_y: u32,
    #[arg(long)]
    cooldown_secs: Option<f64>,
    /// SQLite alert store written by the demo.
    #[arg(long, default_value = "demo_geofence.db")]
    db: String,
    /// Optional deterministic seed for the herd.
    #[arg(long)]
    seed: Option<u64>,
    /// Directory for annotated JPEGs of alert frames.
    #[cfg(feature = "snapshots")]
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

struct Cow {
    cx: f32,
    cy: f32,
    /// Pixels per second, positive is downward.
    vy: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.cows == 0 || args.cows > 5 {
        return Err(anyhow!("cows must be between 1 and 5"));
    }
    let ui = ui::Ui::new(args.ui);
    let total_frames = args.seconds.saturating_mul(args.fps as u64);

    let script = {
        let _stage = ui.stage("Generate herd");
        herd_script(&args, total_frames)
    };

    let dispatcher = {
        let mut stage = ui.stage("Open alert store");
        let sink = SqliteAlertSink::open(&args.db).inspect_err(|_| stage.fail())?;
        AlertDispatcher::new(Box::new(sink), DEFAULT_CAMERA_LABEL)
    };

    let mut settings = MonitorSettings::new(args.boundary_y);
    if let Some(secs) = args.cooldown_secs {
        settings = settings.with_cooldown(
            Duration::try_from_secs_f64(secs)
                .map_err(|_| anyhow!("--cooldown-secs must be a finite number >= 0"))?,
        );
    }
    let detector = IouTracker::new(ScriptedBackend::new(script), TrackerSettings::default());
    let session = MonitorSession::new(
        Box::new(detector),
        BoundaryMonitor::new(settings),
        dispatcher,
    );
    #[cfg(feature = "snapshots")]
    let session = match &args.out {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            session.with_snapshot_dir(dir.clone())
        }
        None => session,
    };
    let mut session = session;

    let summary = {
        let _stage = ui.stage("Run boundary monitor");
        let mut source = open_source(
            &format!("stub://demo?frames={}", total_frames),
            SourceSettings {
                target_fps: args.fps,
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT,
            },
        )?;
        session.run(source.as_mut(), &AtomicBool::new(false))?
    };
    println!("\n{}", summary);

    let _stage = ui.stage("Read back alert store");
    let mut store = SqliteAlertSink::open(&args.db)?;
    store.check_connection()?;
    let stored = store.list_alerts(summary.alerts.len().max(1), true)?;
    println!("Alert store {}: {} most recent", PathBuf::from(&args.db).display(), stored.len());
    for alert in stored {
        println!(
            "  {} cattle_id={:?} cattle_count={} camera={:?}",
            alert.id, alert.record.cattle_id, alert.record.cattle_count, alert.record.camera
        );
    }
    Ok(())
}

/// Per-frame untracked detections for a herd bouncing between pasture edges.
fn herd_script(args: &Args, total_frames: u64) -> Vec<Vec<Detection>> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let lane = FRAME_WIDTH as f32 / args.cows as f32;
    let mut herd: Vec<Cow> = (0..args.cows)
        .map(|i| Cow {
            cx: lane * (i as f32 + 0.5),
            cy: rng.gen_range(80.0..280.0),
            vy: rng.gen_range(15.0..45.0) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 },
        })
        .collect();

    let dt = 1.0 / args.fps as f32;
    let (top, bottom) = (COW_HEIGHT, FRAME_HEIGHT as f32 - COW_HEIGHT);
    (0..total_frames)
        .map(|_| {
            herd.iter_mut()
                .map(|cow| {
                    cow.cy += cow.vy * dt;
                    if cow.cy < top || cow.cy > bottom {
                        cow.vy = -cow.vy;
                        cow.cy = cow.cy.clamp(top, bottom);
                    }
                    Detection::new(
                        BoundingBox::centered(cow.cx, cow.cy, COW_WIDTH, COW_HEIGHT),
                        0.9,
                        COW_CLASS_ID,
                        "cow",
                    )
                })
                .collect()
        })
        .collect()
}
