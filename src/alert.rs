//! Alert records and best-effort dispatch to an [`AlertSink`].
//!
//! Only `Entered` crossings become alerts. Persistence never stops frame
//! processing: a sink that cannot be opened disables persistence with a
//! single warning, and a failed save is logged and dropped.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::config::PersistenceSettings;
use crate::monitor::{CrossingEvent, Direction};
use crate::storage::{AlertSink, SqliteAlertSink};

pub const DEFAULT_CAMERA_LABEL: &str = "Camera 1";

/// Persisted form of an `Entered` crossing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Seconds since epoch when the alert was raised.
    pub timestamp: u64,
    pub cattle_count: usize,
    pub cattle_id: Option<u64>,
    pub boundary_crossed: bool,
    pub camera: String,
    #[serde(default)]
    pub resolved: bool,
}

impl AlertRecord {
    pub fn new(cattle_count: usize, boundary_crossed: bool, cattle_id: Option<u64>) -> Result<Self> {
        Ok(Self {
            timestamp: crate::now_s()?,
            cattle_count,
            cattle_id,
            boundary_crossed,
            camera: DEFAULT_CAMERA_LABEL.to_string(),
            resolved: false,
        })
    }

    pub fn from_event(event: &CrossingEvent, camera: &str) -> Result<Self> {
        let mut record = Self::new(
            event.object_count,
            event.direction == Direction::Entered,
            Some(event.identity),
        )?;
        record.camera = camera.to_string();
        Ok(record)
    }
}

/// An alert as read back from a sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: String,
    #[serde(flatten)]
    pub record: AlertRecord,
}

/// Camera labels are free text shown on dashboards; keep them short and printable.
pub fn validate_camera_label(label: &str) -> Result<()> {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.:-]{0,63}$").unwrap());
    if !re.is_match(label) {
        return Err(anyhow!(
            "camera label must match ^[A-Za-z0-9][A-Za-z0-9 _.:-]{{0,63}}$"
        ));
    }
    Ok(())
}

/// Open the sink described by the persistence settings.
///
/// An endpoint selects the HTTP document store; otherwise the local SQLite
/// store at `db_path` is used.
pub fn open_alert_sink(settings: &PersistenceSettings) -> Result<Box<dyn AlertSink>> {
    if let Some(endpoint) = &settings.endpoint {
        #[cfg(feature = "sink-http")]
        {
            let token = match &settings.token_path {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .map_err(|e| anyhow!("failed to read token {}: {}", path.display(), e))?
                        .trim()
                        .to_string(),
                ),
                None => None,
            };
            let mut sink = crate::transport::HttpAlertSink::new(endpoint, token)?;
            sink.check_connection()?;
            return Ok(Box::new(sink));
        }
        #[cfg(not(feature = "sink-http"))]
        {
            return Err(anyhow!(
                "persistence endpoint {} requires the sink-http feature",
                endpoint
            ));
        }
    }
    let sink = SqliteAlertSink::open(&settings.db_path)?;
    Ok(Box::new(sink))
}

/// Routes `Entered` events to an optional sink and counts outcomes.
pub struct AlertDispatcher {
    sink: Option<Box<dyn AlertSink>>,
    camera: String,
    saved: u64,
    failed: u64,
}

impl AlertDispatcher {
    pub fn new(sink: Box<dyn AlertSink>, camera: &str) -> Self {
        Self {
            sink: Some(sink),
            camera: camera.to_string(),
            saved: 0,
            failed: 0,
        }
    }

    pub fn disabled(camera: &str) -> Self {
        Self {
            sink: None,
            camera: camera.to_string(),
            saved: 0,
            failed: 0,
        }
    }

    /// Open the configured sink, falling back to disabled persistence.
    pub fn open(settings: &PersistenceSettings, camera: &str) -> Self {
        if !settings.enabled {
            log::info!("alert persistence disabled by configuration");
            return Self::disabled(camera);
        }
        match open_alert_sink(settings) {
            Ok(sink) => {
                log::info!("alert persistence enabled ({})", sink.name());
                Self::new(sink, camera)
            }
            Err(e) => {
                log::warn!("alert persistence disabled: {}", e);
                Self::disabled(camera)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Persist an event if it is an `Entered` crossing. Returns the document id.
    pub fn dispatch(&mut self, event: &CrossingEvent) -> Option<String> {
        if event.direction != Direction::Entered {
            return None;
        }
        let sink = self.sink.as_mut()?;
        let saved = AlertRecord::from_event(event, &self.camera)
            .and_then(|record| sink.save_alert(&record));
        match saved {
            Ok(id) => {
                self.saved += 1;
                log::info!("alert saved: {} (cattle {})", id, event.identity);
                Some(id)
            }
            Err(e) => {
                self.failed += 1;
                log::warn!("alert for cattle {} not saved: {}", event.identity, e);
                None
            }
        }
    }

    /// Direct access to the sink, when enabled.
    pub fn sink_mut(&mut self) -> Option<&mut (dyn AlertSink + 'static)> {
        self.sink.as_deref_mut()
    }
}
