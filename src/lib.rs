//! Cattle geofencing
//!
//! Watches a pasture camera (or a recording), detects cattle in every frame
//! and raises an alert when an animal crosses a fixed horizontal boundary line
//! into the restricted zone below it.
//!
//! # Architecture
//!
//! Frames flow through a single-threaded pipeline:
//!
//! 1. **Ingest**: a [`FrameSource`] yields RGB24 frames with session-relative timestamps.
//! 2. **Detect**: a [`DetectorBackend`] (optionally wrapped by [`IouTracker`]) returns boxes.
//! 3. **Monitor**: [`BoundaryMonitor`] compares each identity's vertical center with its
//!    previous one and reports `Entered`/`Exited` crossings, with an optional cooldown.
//! 4. **Persist**: `Entered` events become [`AlertRecord`]s in an [`AlertSink`]. Persistence
//!    is best-effort and never stops the loop.
//! 5. **Annotate**: an [`Overlay`] draws the boundary and boxes for display or snapshots.
//!
//! # Module Structure
//!
//! - `detect`: detector backends, labels, tracker, registry
//! - `ingest`: frame sources (synthetic, files, cameras)
//! - `monitor`: the boundary-crossing state machine
//! - `alert` / `storage` / `transport`: alert records and sinks
//! - `session`: the monitoring loop that owns everything above
//! - `annotate`: on-frame overlay
//! - `config`: file + environment configuration

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod monitor;
pub mod session;
pub mod storage;
pub mod transport;

pub use alert::{AlertDispatcher, AlertRecord, StoredAlert, DEFAULT_CAMERA_LABEL};
#[cfg(feature = "snapshots")]
pub use annotate::draw_overlay;
pub use annotate::Overlay;
pub use config::{GeofenceConfig, PersistenceSettings};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionResult, DetectorBackend, IouTracker,
    ScriptedBackend, TrackerSettings, COW_CLASS_ID,
};
pub use ingest::{open_source, Frame, FrameSource, SourceSettings, SourceStats};
pub use monitor::{
    BoundaryMonitor, CrossingEvent, Direction, FrameReport, IdentityMode, MonitorSettings,
    TrackState,
};
pub use session::{MonitorSession, MonitoringSummary};
pub use storage::{AlertSink, InMemoryAlertSink, SqliteAlertSink};

// -------------------- Time --------------------

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- SQLite --------------------

/// URI for a named in-memory database shared by every connection of this process.
#[cfg(test)]
pub(crate) fn shared_memory_uri() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:geofence_{}?mode=memory&cache=shared",
        hex::encode(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
