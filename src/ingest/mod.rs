//! Frame sources.
//!
//! - Synthetic `stub://` sources (tests, demo)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! Every source yields RGB24 frames with a timestamp measured from the moment
//! the source was connected. `next_frame` returns `Ok(None)` once the source is
//! exhausted; the monitoring loop treats that as a normal end of input.

use anyhow::{anyhow, Result};
use std::time::Duration;

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};

/// One decoded RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the stream.
    pub index: u64,
    /// Time since the source was connected.
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64, timestamp: Duration) -> Self {
        Self {
            pixels,
            width,
            height,
            index,
            timestamp,
        }
    }

    /// Uniform frame, mostly for tests.
    pub fn blank(width: u32, height: u32, index: u64, timestamp: Duration) -> Self {
        let len = (width as usize) * (height as usize) * 3;
        Self::new(vec![0u8; len], width, height, index, timestamp)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` when the source has no more frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the underlying device or file. Idempotent.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Settings shared by every source kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Open a source from its textual description.
///
/// - `camera:N` or `/dev/videoN` selects a V4L2 camera
/// - `stub://...` selects the synthetic file source
/// - anything else is treated as a local video file
pub fn open_source(spec: &str, settings: SourceSettings) -> Result<Box<dyn FrameSource>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(anyhow!("source must not be empty"));
    }
    if let Some(index) = spec.strip_prefix("camera:") {
        let index: u32 = index
            .parse()
            .map_err(|_| anyhow!("camera source must look like camera:N, got {}", spec))?;
        return open_camera(format!("/dev/video{}", index), settings);
    }
    if spec.starts_with("/dev/video") {
        return open_camera(spec.to_string(), settings);
    }
    let source = FileSource::new(FileConfig {
        path: spec.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?;
    Ok(Box::new(source))
}

fn open_camera(device: String, settings: SourceSettings) -> Result<Box<dyn FrameSource>> {
    let source = CameraSource::new(CameraConfig {
        device,
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?;
    Ok(Box::new(source))
}

/// Sources pace and timestamp frames by their target rate, so zero is refused.
pub(crate) fn require_frame_rate(target_fps: u32) -> Result<()> {
    if target_fps == 0 {
        return Err(anyhow!("target_fps must be at least 1"));
    }
    Ok(())
}

/// Timestamp of frame `index` for a nominal frame rate.
pub(crate) fn nominal_timestamp(index: u64, target_fps: u32) -> Duration {
    if target_fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(index as f64 / target_fps as f64)
}

/// How long a live source may go without a frame before it reports unhealthy.
#[cfg_attr(
    not(any(feature = "ingest-file-ffmpeg", feature = "ingest-v4l2")),
    allow(dead_code)
)]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let frame_ms = 1000u64.checked_div(target_fps as u64).unwrap_or(0);
    Duration::from_millis((frame_ms * 6).max(2_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_sources_open_without_features() -> Result<()> {
        let mut source = open_source("stub://pasture?frames=2", SourceSettings::default())?;
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn malformed_camera_spec_is_rejected() {
        assert!(open_source("camera:front", SourceSettings::default()).is_err());
        assert!(open_source("   ", SourceSettings::default()).is_err());
    }

    #[test]
    fn zero_frame_rate_is_rejected_for_every_source_kind() {
        let settings = SourceSettings {
            target_fps: 0,
            ..SourceSettings::default()
        };
        for spec in ["stub://pasture?frames=2", "camera:0", "/dev/video3", "field.mp4"] {
            let err = open_source(spec, settings).err().expect("zero fps must fail");
            assert!(err.to_string().contains("target_fps"), "{spec}: {err}");
        }
    }

    #[test]
    fn remote_urls_are_rejected() {
        assert!(open_source("rtsp://10.0.0.2/stream", SourceSettings::default()).is_err());
    }

    #[test]
    fn nominal_timestamps_follow_frame_rate() {
        assert_eq!(nominal_timestamp(0, 10), Duration::ZERO);
        assert_eq!(nominal_timestamp(25, 10), Duration::from_millis(2500));
        assert_eq!(nominal_timestamp(5, 0), Duration::ZERO);
    }

    #[test]
    fn health_grace_has_a_floor() {
        assert_eq!(health_grace(0), Duration::from_secs(2));
        assert_eq!(health_grace(30), Duration::from_secs(2));
        assert_eq!(health_grace(1), Duration::from_secs(6));
    }
}
