//! detect_image - count cattle in a still image
//!
//! Runs the YOLOv8 detector once over a JPEG or PNG and prints the number of
//! detections with their confidences. Useful for checking a model and a
//! confidence threshold before pointing `geofenced` at a camera.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use cattle_geofence::{BackendRegistry, Detection, DetectionResult, DetectorBackend, TractBackend};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect cattle in a single image")]
struct Args {
    /// JPEG or PNG to analyse.
    image: PathBuf,
    /// ONNX detector weights.
    #[arg(long, default_value = "yolov8n.onnx")]
    model: PathBuf,
    #[arg(long, default_value_t = 0.3)]
    confidence: f32,
    /// Only count detections with this label (e.g. "cow").
    #[arg(long)]
    class_filter: Option<String>,
    /// Print the detections as JSON instead of a summary.
    #[arg(long)]
    json: bool,
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.confidence) {
        return Err(anyhow!("--confidence must be within 0..=1"));
    }
    let ui = ui::Ui::new(args.ui);

    let (pixels, width, height) = {
        let mut stage = ui.stage("Decode image");
        load_rgb(&args.image).inspect_err(|_| stage.fail())?
    };
    let mut detector = {
        let mut stage = ui.stage("Load detector");
        let tract = TractBackend::new(&args.model)
            .inspect_err(|_| stage.fail())?
            .with_threshold(args.confidence);
        let mut registry = BackendRegistry::new();
        registry.register(tract);
        registry.take_default()?
    };
    let result = {
        let mut stage = ui.stage("Detect");
        detector
            .detect(&pixels, width, height)
            .inspect_err(|_| stage.fail())?
    };

    let detections = counted(result, args.class_filter.as_deref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
    } else {
        for line in report_lines(&detections) {
            println!("{line}");
        }
    }
    Ok(())
}

fn load_rgb(path: &Path) -> Result<(Vec<u8>, u32, u32)> {
    if !path.is_file() {
        return Err(anyhow!("image not found: {}", path.display()));
    }
    let rgb = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok((rgb.into_raw(), width, height))
}

/// Detections that pass the optional label filter, best first.
fn counted(result: DetectionResult, class_filter: Option<&str>) -> Vec<Detection> {
    let mut detections: Vec<Detection> = result
        .detections
        .into_iter()
        .filter(|det| class_filter.map_or(true, |label| det.label.eq_ignore_ascii_case(label)))
        .collect();
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

fn report_lines(detections: &[Detection]) -> Vec<String> {
    let mut lines = vec![format!("Detected {} cattle", detections.len())];
    lines.extend(
        detections
            .iter()
            .map(|det| format!("  {}: confidence {:.2}", det.label, det.confidence)),
    );
    lines
}
