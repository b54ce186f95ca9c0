//! Monitoring session.
//!
//! `MonitorSession` owns the detector, the boundary monitor and the alert
//! dispatcher, and drives them one frame at a time. Nothing here is global:
//! two sessions never share track state.

use anyhow::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::alert::AlertDispatcher;
use crate::annotate::Overlay;
use crate::detect::{DetectionCapability, DetectorBackend};
use crate::ingest::{Frame, FrameSource, SourceStats};
use crate::monitor::{BoundaryMonitor, CrossingEvent, Direction, FrameReport, IdentityMode};

/// Totals for one monitoring run.
#[derive(Clone, Debug, Default)]
pub struct MonitoringSummary {
    pub frames_processed: u64,
    /// Reported `Entered` events, in order.
    pub alerts: Vec<CrossingEvent>,
    pub exits: u64,
    /// `Entered` crossings withheld by cooldown or alternation.
    pub suppressed: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    /// Frames skipped because the detector failed on them.
    pub detector_failures: u64,
    /// Frames read while the source reported itself unhealthy.
    pub unhealthy_frames: u64,
    /// True when the loop ended on the stop flag rather than end of input.
    pub cancelled: bool,
    pub source: SourceStats,
}

impl fmt::Display for MonitoringSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "MONITORING SUMMARY")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Source: {}", self.source.source)?;
        writeln!(f, "Frames processed: {}", self.frames_processed)?;
        writeln!(f, "Total alerts: {}", self.alerts.len())?;
        writeln!(f, "Returns to safe area: {}", self.exits)?;
        if self.suppressed > 0 {
            writeln!(f, "Suppressed crossings: {}", self.suppressed)?;
        }
        writeln!(
            f,
            "Alerts persisted: {} (failed: {})",
            self.persisted, self.persistence_failures
        )?;
        if self.detector_failures > 0 {
            writeln!(f, "Frames skipped (detector errors): {}", self.detector_failures)?;
        }
        if self.unhealthy_frames > 0 {
            writeln!(f, "Frames read from an unhealthy source: {}", self.unhealthy_frames)?;
        }
        if self.cancelled {
            writeln!(f, "Stopped before end of input")?;
        }
        for alert in &self.alerts {
            writeln!(
                f,
                "{} - Cattle {}",
                format_offset(alert.timestamp),
                alert.identity
            )?;
        }
        Ok(())
    }
}

/// `HH:MM:SS.mmm` offset from the start of the session.
pub fn format_offset(offset: Duration) -> String {
    let total = offset.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        offset.subsec_millis()
    )
}

pub struct MonitorSession {
    detector: Box<dyn DetectorBackend>,
    monitor: BoundaryMonitor,
    dispatcher: AlertDispatcher,
    confidence_threshold: f32,
    summary: MonitoringSummary,
    last_overlay: Option<Overlay>,
    #[cfg(feature = "snapshots")]
    snapshot_dir: Option<std::path::PathBuf>,
}

impl MonitorSession {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        monitor: BoundaryMonitor,
        dispatcher: AlertDispatcher,
    ) -> Self {
        if monitor.settings().identity_mode == IdentityMode::Tracked
            && !detector.supports(DetectionCapability::Tracking)
        {
            log::warn!(
                "detector {} does not track; detections without ids will be skipped",
                detector.name()
            );
        }
        Self {
            detector,
            monitor,
            dispatcher,
            confidence_threshold: 0.0,
            summary: MonitoringSummary::default(),
            last_overlay: None,
            #[cfg(feature = "snapshots")]
            snapshot_dir: None,
        }
    }

    /// Drop detections below `threshold` before they reach the monitor.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Write an annotated JPEG into `dir` for every frame that raises an alert.
    #[cfg(feature = "snapshots")]
    pub fn with_snapshot_dir(mut self, dir: std::path::PathBuf) -> Self {
        self.snapshot_dir = Some(dir);
        self
    }

    pub fn monitor(&self) -> &BoundaryMonitor {
        &self.monitor
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub fn summary(&self) -> &MonitoringSummary {
        &self.summary
    }

    /// Overlay for the most recently processed frame.
    pub fn last_overlay(&self) -> Option<&Overlay> {
        self.last_overlay.as_ref()
    }

    /// Detect, evaluate and persist one frame.
    pub fn step(&mut self, frame: &Frame) -> Result<FrameReport> {
        let mut result = self
            .detector
            .detect(&frame.pixels, frame.width, frame.height)?;
        let threshold = self.confidence_threshold;
        result.detections.retain(|det| det.confidence >= threshold);

        let report = self
            .monitor
            .observe_frame(&result.detections, frame.timestamp);
        self.summary.frames_processed += 1;
        self.summary.suppressed += report.suppressed.len() as u64;

        for event in &report.events {
            match event.direction {
                Direction::Entered => {
                    log::warn!(
                        "{} - ALERT: cattle {} crossed the boundary ({} in view)",
                        format_offset(event.timestamp),
                        event.identity,
                        event.object_count
                    );
                    self.dispatcher.dispatch(event);
                    self.summary.alerts.push(event.clone());
                }
                Direction::Exited => {
                    log::info!(
                        "{} - cattle {} returned to safe area",
                        format_offset(event.timestamp),
                        event.identity
                    );
                    self.summary.exits += 1;
                }
            }
        }
        self.summary.persisted = self.dispatcher.saved();
        self.summary.persistence_failures = self.dispatcher.failed();

        let overlay = Overlay::from_report(
            &report,
            self.monitor.boundary_y(),
            self.summary.alerts.len(),
        );
        #[cfg(feature = "snapshots")]
        if report.entered().next().is_some() {
            self.write_snapshot(frame, &overlay);
        }
        self.last_overlay = Some(overlay);

        Ok(report)
    }

    #[cfg(feature = "snapshots")]
    fn write_snapshot(&self, frame: &Frame, overlay: &Overlay) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        let mut pixels = frame.pixels.clone();
        let path = dir.join(format!("alert_{:06}.jpg", frame.index));
        let written = crate::annotate::draw_overlay(&mut pixels, frame.width, frame.height, overlay)
            .and_then(|_| {
                crate::annotate::save_snapshot(&path, &pixels, frame.width, frame.height)
            });
        match written {
            Ok(()) => log::info!("snapshot written to {}", path.display()),
            Err(e) => log::warn!("snapshot not written: {}", e),
        }
    }

    /// Run until the source is exhausted or `stop` is set.
    ///
    /// A source read error ends the loop like end of input. A detector error
    /// skips that frame. Health is checked after every read and logged when it
    /// changes. The source is closed on every exit path.
    pub fn run(&mut self, source: &mut dyn FrameSource, stop: &AtomicBool) -> Result<MonitoringSummary> {
        source.connect()?;
        if let Err(e) = self.detector.warm_up() {
            source.close();
            return Err(e);
        }

        let mut healthy = true;
        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested; closing source");
                self.summary.cancelled = true;
                break;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("frame source unreadable, ending run: {}", e);
                    break;
                }
            };
            match (healthy, source.is_healthy()) {
                (true, false) => {
                    log::warn!(
                        "frame source {} reports unhealthy at frame {}",
                        source.stats().source,
                        frame.index
                    );
                    healthy = false;
                }
                (false, true) => {
                    log::info!("frame source {} is healthy again", source.stats().source);
                    healthy = true;
                }
                _ => {}
            }
            if !healthy {
                self.summary.unhealthy_frames += 1;
            }
            if let Err(e) = self.step(&frame) {
                self.summary.detector_failures += 1;
                log::warn!("frame {} skipped: {}", frame.index, e);
            }
        }

        source.close();
        self.summary.source = source.stats();
        Ok(self.summary.clone())
    }
}
