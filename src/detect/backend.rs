use anyhow::Result;

use crate::detect::result::DetectionResult;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Bounding boxes with class labels.
    ObjectDetection,
    /// Stable per-object track ids across consecutive frames.
    Tracking,
}

/// Detector backend trait.
///
/// Backends map one RGB24 frame to a set of detections. A backend that
/// reports `Tracking` must keep `track_id` stable for the same physical
/// object across consecutive frames while tracking holds. Detections without
/// a track id cannot be correlated across frames.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        (**self).supports(capability)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        (**self).detect(pixels, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
