use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::labels::{coco_label, COW_CLASS_ID};
use crate::detect::result::{BoundingBox, Detection, DetectionResult};

/// Scripted backend for tests and the demo.
///
/// Replays one queued detection set per `detect` call and ignores the pixels.
/// Once the script is exhausted every frame yields no detections.
#[derive(Default)]
pub struct ScriptedBackend {
    frames: VecDeque<Vec<Detection>>,
    tracked: bool,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        let mut all = frames.iter().flatten().peekable();
        let tracked = all.peek().is_some() && all.all(|d| d.track_id.is_some());
        Self {
            frames: frames.into(),
            tracked,
        }
    }

    /// Script a single tracked object from a sequence of vertical centers.
    /// `None` entries produce frames without detections.
    pub fn single_track(track_id: u64, centers_y: &[Option<f32>]) -> Self {
        let frames = centers_y
            .iter()
            .map(|center| match center {
                Some(cy) => vec![scripted_cow(track_id, 320.0, *cy)],
                None => Vec::new(),
            })
            .collect();
        Self::new(frames)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

/// A 60x40 "cow" box centered at `(cx, cy)`.
pub fn scripted_cow(track_id: u64, cx: f32, cy: f32) -> Detection {
    Detection::new(
        BoundingBox::centered(cx, cy, 60.0, 40.0),
        0.9,
        COW_CLASS_ID,
        coco_label(COW_CLASS_ID),
    )
    .with_track_id(track_id)
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::ObjectDetection => true,
            DetectionCapability::Tracking => self.tracked,
        }
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<DetectionResult> {
        let detections = self.frames.pop_front().unwrap_or_default();
        Ok(DetectionResult::new(detections))
    }
}
