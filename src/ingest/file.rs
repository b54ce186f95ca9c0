//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file (ffmpeg backend) or
//! generates them (`stub://name?frames=N`). Remote URLs are refused: the
//! monitor only ingests local recordings.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{nominal_timestamp, require_frame_rate, Frame, FrameSource, SourceStats};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/geofence/pasture.mp4") or `stub://` name.
    pub path: String,
    /// Nominal frame rate; synthetic timestamps are derived from it.
    pub target_fps: u32,
    /// Synthetic frame size. Decoded files keep their own size.
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        require_frame_rate(config.target_fps)?;
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)?),
            });
        }
        if !std::path::Path::new(&config.path).is_file() {
            return Err(anyhow!("video file not found: {}", config.path));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "file ingestion requires the ingest-file-ffmpeg feature"
            ))
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.exhausted = true,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and the demo
// ----------------------------------------------------------------------------

pub(crate) struct SyntheticFileSource {
    config: FileConfig,
    /// `None` means the source never ends.
    frame_limit: Option<u64>,
    frame_count: u64,
    pub(crate) exhausted: bool,
}

impl SyntheticFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        let frame_limit = parse_stub_frames(&config.path)?;
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            exhausted: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Option<Frame> {
        if self.exhausted || self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            self.exhausted = true;
            return None;
        }
        let index = self.frame_count;
        self.frame_count += 1;
        Some(Frame::new(
            pasture_pixels(self.config.width, self.config.height, index),
            self.config.width,
            self.config.height,
            index,
            nominal_timestamp(index, self.config.target_fps),
        ))
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }
}

/// Sky-to-grass gradient with a slow drift so consecutive frames differ.
pub(crate) fn pasture_pixels(width: u32, height: u32, index: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut pixels = vec![0u8; w * h * 3];
    let horizon = h / 3;
    for y in 0..h {
        let shade = ((y as u64 + index) % 32) as u8;
        let rgb = if y < horizon {
            [120 + shade, 170 + shade, 230]
        } else {
            [60 + shade, 130 + shade, 40]
        };
        for x in 0..w {
            let offset = (y * w + x) * 3;
            pixels[offset..offset + 3].copy_from_slice(&rgb);
        }
    }
    pixels
}

/// Parse the optional `frames=N` query of a `stub://` path.
fn parse_stub_frames(path: &str) -> Result<Option<u64>> {
    let Some((_, query)) = path.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key == "frames" {
            let frames = value
                .parse::<u64>()
                .map_err(|_| anyhow!("stub source frames must be an integer: {}", path))?;
            return Ok(Some(frames));
        }
    }
    Ok(None)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
