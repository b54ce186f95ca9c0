//! Boundary-crossing monitor.
//!
//! Consumes one detection set per frame, remembers the last vertical center
//! of every identity it has seen, and reports when an identity moves from
//! one side of the horizontal boundary line to the other.
//!
//! Frame coordinates grow downward, so the restricted zone is everything
//! strictly below the line (`center_y > boundary_y`). A center exactly on the
//! line is on neither side: it never triggers a crossing, and the next frame
//! is compared against it.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection};

/// How the monitor keys its per-object state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Use the detector's `track_id`; detections without one are skipped.
    #[default]
    Tracked,
    /// Use the enumeration index within the frame. Not stable when the
    /// order or number of detections changes between frames.
    FrameIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Moved from above the line to below it.
    Entered,
    /// Moved from below the line back above it.
    Exited,
}

/// Position of a center relative to the boundary line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Safe,
    Restricted,
    OnLine,
}

impl Side {
    pub fn of(center_y: f32, boundary_y: f32) -> Self {
        if center_y < boundary_y {
            Side::Safe
        } else if center_y > boundary_y {
            Side::Restricted
        } else {
            Side::OnLine
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorSettings {
    pub boundary_y: f32,
    /// Only detections with this label are evaluated (case-insensitive).
    pub class_filter: Option<String>,
    /// Minimum time between two reported `Entered` events of one identity.
    pub cooldown: Option<Duration>,
    pub identity_mode: IdentityMode,
    /// Suppress a repeated `Entered` until an `Exited` has been reported.
    pub strict_alternation: bool,
    /// Drop identities not observed for more than this many frames.
    pub max_idle_frames: Option<u64>,
}

impl MonitorSettings {
    pub fn new(boundary_y: u32) -> Self {
        Self {
            boundary_y: boundary_y as f32,
            class_filter: None,
            cooldown: None,
            identity_mode: IdentityMode::Tracked,
            strict_alternation: false,
            max_idle_frames: None,
        }
    }

    pub fn with_class_filter(mut self, label: &str) -> Self {
        self.class_filter = Some(label.to_string());
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_identity_mode(mut self, mode: IdentityMode) -> Self {
        self.identity_mode = mode;
        self
    }

    pub fn with_strict_alternation(mut self, enabled: bool) -> Self {
        self.strict_alternation = enabled;
        self
    }

    pub fn with_max_idle_frames(mut self, frames: u64) -> Self {
        self.max_idle_frames = Some(frames);
        self
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::new(400)
    }
}

/// Per-identity state carried between frames.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackState {
    pub last_center_y: f32,
    /// Timestamp of the last reported `Entered` event.
    pub last_alert_time: Option<Duration>,
    /// Direction of the last reported event.
    pub last_direction: Option<Direction>,
    pub last_seen_frame: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub identity: u64,
    pub direction: Direction,
    /// Frame timestamp, relative to the start of the session.
    pub timestamp: Duration,
    /// Box center at the time of crossing.
    pub position: (f32, f32),
    pub frame_index: u64,
    /// Objects evaluated in the frame the crossing happened in.
    pub object_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    Cooldown,
    Alternation,
}

/// An `Entered` transition that was not reported.
#[derive(Clone, Debug, PartialEq)]
pub struct SuppressedCrossing {
    pub event: CrossingEvent,
    pub reason: SuppressReason,
}

/// One evaluated detection, for annotation.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedObject {
    pub identity: Option<u64>,
    pub bbox: BoundingBox,
    pub side: Side,
}

/// Everything the monitor decided about one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp: Duration,
    pub object_count: usize,
    pub events: Vec<CrossingEvent>,
    pub suppressed: Vec<SuppressedCrossing>,
    pub objects: Vec<ObservedObject>,
}

impl FrameReport {
    /// True when any identity crossed into the restricted zone this frame,
    /// whether or not the alert was reported.
    pub fn crossed(&self) -> bool {
        !self.suppressed.is_empty()
            || self
                .events
                .iter()
                .any(|ev| ev.direction == Direction::Entered)
    }

    pub fn entered(&self) -> impl Iterator<Item = &CrossingEvent> {
        self.events
            .iter()
            .filter(|ev| ev.direction == Direction::Entered)
    }
}

pub struct BoundaryMonitor {
    settings: MonitorSettings,
    tracks: HashMap<u64, TrackState>,
    frames_processed: u64,
}

impl BoundaryMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            tracks: HashMap::new(),
            frames_processed: 0,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn boundary_y(&self) -> f32 {
        self.settings.boundary_y
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn track(&self, identity: u64) -> Option<&TrackState> {
        self.tracks.get(&identity)
    }

    pub fn tracked_identities(&self) -> usize {
        self.tracks.len()
    }

    /// Forget all identities and restart frame numbering.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.frames_processed = 0;
    }

    /// Process one frame and return the reported crossing events.
    pub fn process_frame(
        &mut self,
        detections: &[Detection],
        frame_timestamp: Duration,
    ) -> Vec<CrossingEvent> {
        self.observe_frame(detections, frame_timestamp).events
    }

    /// Process one frame and return the full report.
    pub fn observe_frame(
        &mut self,
        detections: &[Detection],
        frame_timestamp: Duration,
    ) -> FrameReport {
        let frame_index = self.frames_processed;
        self.frames_processed += 1;

        let targets: Vec<&Detection> = detections
            .iter()
            .filter(|det| self.is_target(det))
            .collect();

        let mut report = FrameReport {
            frame_index,
            timestamp: frame_timestamp,
            object_count: targets.len(),
            ..FrameReport::default()
        };

        for (index, det) in targets.iter().enumerate() {
            let center_y = det.center_y();
            let identity = match self.settings.identity_mode {
                IdentityMode::Tracked => det.track_id,
                IdentityMode::FrameIndex => Some(index as u64),
            };
            report.objects.push(ObservedObject {
                identity,
                bbox: det.bbox,
                side: Side::of(center_y, self.settings.boundary_y),
            });

            let Some(identity) = identity else {
                log::trace!("frame {}: detection without track id skipped", frame_index);
                continue;
            };

            let event = CrossingEvent {
                identity,
                direction: Direction::Entered,
                timestamp: frame_timestamp,
                position: det.bbox.center(),
                frame_index,
                object_count: report.object_count,
            };
            self.update_track(identity, center_y, event, &mut report);
        }

        self.evict_idle(frame_index);
        report
    }

    fn is_target(&self, det: &Detection) -> bool {
        match &self.settings.class_filter {
            Some(label) => det.label.eq_ignore_ascii_case(label),
            None => true,
        }
    }

    fn update_track(
        &mut self,
        identity: u64,
        center_y: f32,
        mut event: CrossingEvent,
        report: &mut FrameReport,
    ) {
        let boundary_y = self.settings.boundary_y;
        let frame_index = event.frame_index;

        let Some(track) = self.tracks.get_mut(&identity) else {
            self.tracks.insert(
                identity,
                TrackState {
                    last_center_y: center_y,
                    last_alert_time: None,
                    last_direction: None,
                    last_seen_frame: frame_index,
                },
            );
            return;
        };

        let previous_y = track.last_center_y;
        track.last_center_y = center_y;
        track.last_seen_frame = frame_index;

        if previous_y < boundary_y && center_y > boundary_y {
            let suppress = if self.settings.strict_alternation
                && track.last_direction == Some(Direction::Entered)
            {
                Some(SuppressReason::Alternation)
            } else {
                match (self.settings.cooldown, track.last_alert_time) {
                    (Some(cooldown), Some(last))
                        if event.timestamp.saturating_sub(last) < cooldown =>
                    {
                        Some(SuppressReason::Cooldown)
                    }
                    _ => None,
                }
            };

            match suppress {
                Some(reason) => {
                    log::debug!("identity {} entered, alert suppressed ({:?})", identity, reason);
                    report.suppressed.push(SuppressedCrossing { event, reason });
                }
                None => {
                    track.last_alert_time = Some(event.timestamp);
                    track.last_direction = Some(Direction::Entered);
                    report.events.push(event);
                }
            }
        } else if previous_y > boundary_y && center_y < boundary_y {
            track.last_direction = Some(Direction::Exited);
            event.direction = Direction::Exited;
            report.events.push(event);
        }
    }

    fn evict_idle(&mut self, frame_index: u64) {
        let Some(max_idle) = self.settings.max_idle_frames else {
            return;
        };
        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| frame_index - track.last_seen_frame <= max_idle);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            log::debug!("evicted {} idle identities at frame {}", evicted, frame_index);
        }
    }
}
