//! Greedy IoU tracker.
//!
//! Wraps any [`DetectorBackend`] and assigns stable `track_id`s by matching
//! each frame's boxes against the boxes of live tracks. A track that finds no
//! match is kept for `max_age` frames before it is dropped; an object that
//! reappears after that gets a fresh id.

use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, DetectionResult};

#[derive(Clone, Copy, Debug)]
pub struct TrackerSettings {
    /// Minimum IoU for a detection to continue a track.
    pub iou_threshold: f32,
    /// Frames a track survives without a match.
    pub max_age: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_age: 30,
        }
    }
}

#[derive(Clone, Debug)]
struct Track {
    id: u64,
    class_id: u32,
    bbox: BoundingBox,
    misses: u32,
}

pub struct IouTracker<B> {
    inner: B,
    settings: TrackerSettings,
    tracks: Vec<Track>,
    next_id: u64,
}

impl<B: DetectorBackend> IouTracker<B> {
    pub fn new(inner: B, settings: TrackerSettings) -> Self {
        Self {
            inner,
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Number of live tracks (matched or coasting).
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Assign track ids in place.
    pub fn assign(&mut self, result: &mut DetectionResult) {
        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in result.detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.settings.iou_threshold {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; result.detections.len()];
        for (_, ti, di) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = result.detections[di].bbox;
            track.misses = 0;
            result.detections[di].track_id = Some(track.id);
        }

        for (track, used) in self.tracks.iter_mut().zip(&track_used) {
            if !used {
                track.misses += 1;
            }
        }
        let max_age = self.settings.max_age;
        self.tracks.retain(|track| track.misses <= max_age);

        for (det, used) in result.detections.iter_mut().zip(det_used) {
            if used {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            det.track_id = Some(id);
            self.tracks.push(Track {
                id,
                class_id: det.class_id,
                bbox: det.bbox,
                misses: 0,
            });
        }
    }
}

impl<B: DetectorBackend> DetectorBackend for IouTracker<B> {
    fn name(&self) -> &'static str {
        "iou_tracker"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::Tracking => true,
            other => self.inner.supports(other),
        }
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult> {
        let mut result = self.inner.detect(pixels, width, height)?;
        self.assign(&mut result);
        Ok(result)
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}
