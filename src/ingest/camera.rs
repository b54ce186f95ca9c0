//! Camera frame source.
//!
//! `CameraSource` captures from a local V4L2 device node (feature:
//! ingest-v4l2), with a synthetic fallback for `stub://` devices so the
//! monitoring loop can be exercised without hardware.

use anyhow::Result;

#[cfg(feature = "ingest-v4l2")]
use self::device::DeviceCameraSource;
use super::file::SyntheticFileSource;
use super::{require_frame_rate, FileConfig, Frame, FrameSource, SourceStats};

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested capture rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCameraSource),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        require_frame_rate(config.target_fps)?;
        if config.device.starts_with("stub://") {
            let synthetic = SyntheticFileSource::new(FileConfig {
                path: config.device,
                target_fps: config.target_fps,
                width: config.width,
                height: config.height,
            })?;
            return Ok(Self {
                backend: CameraBackend::Synthetic(synthetic),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCameraSource::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow::anyhow!(
                "camera {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.exhausted = true,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device capture
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
mod device {
    use anyhow::{anyhow, Context, Result};
    use ouroboros::self_referencing;
    use std::time::Instant;

    use super::CameraConfig;
    use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};
    use crate::ingest::{health_grace, Frame, SourceStats};

    pub(super) struct DeviceCameraSource {
        config: CameraConfig,
        state: Option<DeviceState>,
        format: PixelFormat,
        frame_count: u64,
        connected_at: Option<Instant>,
        last_frame_at: Option<Instant>,
        last_error: Option<String>,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct DeviceState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceCameraSource {
        pub(super) fn new(config: CameraConfig) -> Self {
            Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
                format: PixelFormat::Rgb24,
                frame_count: 0,
                connected_at: None,
                last_frame_at: None,
                last_error: None,
            }
        }

        pub(super) fn connect(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&self.config.device)
                .with_context(|| format!("open camera {}", self.config.device))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "CameraSource: RGB3 rejected on {}: {}; trying YUYV",
                        self.config.device,
                        err
                    );
                    format.fourcc = v4l::FourCC::new(b"YUYV");
                    device
                        .set_format(&format)
                        .context("negotiate YUYV capture format")?
                }
            };
            self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
                anyhow!(
                    "camera {} delivers unsupported format {}",
                    self.config.device,
                    format.fourcc
                )
            })?;

            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }

            self.active_width = format.width;
            self.active_height = format.height;
            self.last_error = None;

            let state = DeviceStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()
            .inspect_err(|err| self.last_error = Some(err.to_string()))?;
            self.state = Some(state);
            self.connected_at = Some(Instant::now());

            log::info!(
                "CameraSource: connected to {} ({}x{}, {:?})",
                self.config.device,
                self.active_width,
                self.active_height,
                self.format
            );
            Ok(())
        }

        pub(super) fn next_frame(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let connected_at = self.connected_at.context("camera not connected")?;
            let state = self.state.as_mut().context("camera not connected")?;
            let buf = state
                .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
                .map_err(|err| {
                    self.last_error = Some(err.to_string());
                    anyhow::Error::new(err).context("capture v4l2 frame")
                })?;
            let pixels =
                normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)?;

            let index = self.frame_count;
            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());

            Ok(Frame::new(
                pixels,
                self.active_width,
                self.active_height,
                index,
                connected_at.elapsed(),
            ))
        }

        pub(super) fn is_healthy(&self) -> bool {
            if self.last_error.is_some() || self.state.is_none() {
                return false;
            }
            let Some(last_frame_at) = self.last_frame_at else {
                return true;
            };
            last_frame_at.elapsed() <= health_grace(self.config.target_fps)
        }

        pub(super) fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.frame_count,
                source: self.config.device.clone(),
            }
        }

        pub(super) fn close(&mut self) {
            if self.state.take().is_some() {
                log::info!("CameraSource: released {}", self.config.device);
            }
        }
    }
}
