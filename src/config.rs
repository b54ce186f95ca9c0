use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{validate_camera_label, DEFAULT_CAMERA_LABEL};
use crate::detect::TrackerSettings;
use crate::monitor::{IdentityMode, MonitorSettings};

const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_SOURCE: &str = "stub://pasture?frames=300";
const DEFAULT_BOUNDARY_Y: u32 = 400;
const DEFAULT_CONFIDENCE: f32 = 0.3;
const DEFAULT_DB_PATH: &str = "geofence.db";

#[derive(Debug, Deserialize, Default)]
struct GeofenceConfigFile {
    model_path: Option<String>,
    source: Option<String>,
    boundary_y: Option<u32>,
    confidence_threshold: Option<f32>,
    class_filter: Option<String>,
    alert_cooldown_seconds: Option<f64>,
    identity_mode: Option<IdentityMode>,
    strict_alternation: Option<bool>,
    max_idle_frames: Option<u64>,
    use_persistence: Option<bool>,
    camera_label: Option<String>,
    persistence: Option<PersistenceConfigFile>,
    tracker: Option<TrackerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PersistenceConfigFile {
    db_path: Option<String>,
    endpoint: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    iou_threshold: Option<f32>,
    max_age: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GeofenceConfig {
    pub model_path: String,
    pub source: String,
    pub boundary_y: u32,
    pub confidence_threshold: f32,
    pub class_filter: Option<String>,
    pub alert_cooldown: Option<Duration>,
    pub identity_mode: IdentityMode,
    pub strict_alternation: bool,
    pub max_idle_frames: Option<u64>,
    pub camera_label: String,
    pub persistence: PersistenceSettings,
    pub tracker: TrackerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub db_path: String,
    /// Document-store collection URL; selects the HTTP sink when set.
    pub endpoint: Option<String>,
    pub token_path: Option<PathBuf>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: DEFAULT_DB_PATH.to_string(),
            endpoint: None,
            token_path: None,
        }
    }
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        // Defaults are infallible: an empty file never fails validation.
        Self::from_file(GeofenceConfigFile::default())
    }
}

impl GeofenceConfig {
    /// Load from the file named by `GEOFENCE_CONFIG` (if any), then apply
    /// `GEOFENCE_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GEOFENCE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => GeofenceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GeofenceConfigFile) -> Self {
        let persistence = PersistenceSettings {
            enabled: file.use_persistence.unwrap_or(true),
            db_path: file
                .persistence
                .as_ref()
                .and_then(|p| p.db_path.clone())
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            endpoint: file.persistence.as_ref().and_then(|p| p.endpoint.clone()),
            token_path: file.persistence.and_then(|p| p.token_path),
        };
        let defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            iou_threshold: file
                .tracker
                .as_ref()
                .and_then(|t| t.iou_threshold)
                .unwrap_or(defaults.iou_threshold),
            max_age: file
                .tracker
                .and_then(|t| t.max_age)
                .unwrap_or(defaults.max_age),
        };
        Self {
            model_path: file
                .model_path
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            boundary_y: file.boundary_y.unwrap_or(DEFAULT_BOUNDARY_Y),
            confidence_threshold: file.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
            class_filter: file.class_filter,
            // Negative or NaN values are rejected in validate().
            alert_cooldown: file
                .alert_cooldown_seconds
                .map(|s| Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)),
            identity_mode: file.identity_mode.unwrap_or_default(),
            strict_alternation: file.strict_alternation.unwrap_or(false),
            max_idle_frames: file.max_idle_frames,
            camera_label: file
                .camera_label
                .unwrap_or_else(|| DEFAULT_CAMERA_LABEL.to_string()),
            persistence,
            tracker,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("GEOFENCE_MODEL_PATH") {
            self.model_path = path;
        }
        if let Some(source) = env_nonempty("GEOFENCE_SOURCE") {
            self.source = source;
        }
        if let Some(y) = env_nonempty("GEOFENCE_BOUNDARY_Y") {
            self.boundary_y = y
                .parse()
                .map_err(|_| anyhow!("GEOFENCE_BOUNDARY_Y must be a non-negative integer"))?;
        }
        if let Some(conf) = env_nonempty("GEOFENCE_CONFIDENCE") {
            self.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("GEOFENCE_CONFIDENCE must be a number"))?;
        }
        if let Some(label) = env_nonempty("GEOFENCE_CLASS_FILTER") {
            self.class_filter = match label.as_str() {
                "none" | "off" => None,
                _ => Some(label),
            };
        }
        if let Some(secs) = env_nonempty("GEOFENCE_COOLDOWN_SECS") {
            let secs: f64 = secs
                .parse()
                .map_err(|_| anyhow!("GEOFENCE_COOLDOWN_SECS must be a number of seconds"))?;
            self.alert_cooldown = Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|_| anyhow!("GEOFENCE_COOLDOWN_SECS must be >= 0"))?,
            );
        }
        if let Some(flag) = env_nonempty("GEOFENCE_USE_PERSISTENCE") {
            self.persistence.enabled = parse_bool(&flag)
                .ok_or_else(|| anyhow!("GEOFENCE_USE_PERSISTENCE must be true or false"))?;
        }
        if let Some(db_path) = env_nonempty("GEOFENCE_DB_PATH") {
            self.persistence.db_path = db_path;
        }
        if let Some(endpoint) = env_nonempty("GEOFENCE_ENDPOINT") {
            self.persistence.endpoint = Some(endpoint);
        }
        if let Some(label) = env_nonempty("GEOFENCE_CAMERA_LABEL") {
            self.camera_label = label;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.model_path.trim().is_empty() {
            return Err(anyhow!("model_path must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        if self.alert_cooldown == Some(Duration::MAX) {
            return Err(anyhow!("alert_cooldown_seconds must be a finite number >= 0"));
        }
        if let Some(label) = &self.class_filter {
            let label = label.trim();
            if label.is_empty() {
                return Err(anyhow!("class_filter must not be empty when set"));
            }
            self.class_filter = Some(label.to_lowercase());
        }
        if !(self.tracker.iou_threshold > 0.0 && self.tracker.iou_threshold <= 1.0) {
            return Err(anyhow!("tracker.iou_threshold must be within (0, 1]"));
        }
        validate_camera_label(&self.camera_label)?;
        if let Some(endpoint) = &self.persistence.endpoint {
            crate::transport::validate_endpoint(endpoint)
                .context("persistence.endpoint is not a usable collection URL")?;
        }
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            boundary_y: self.boundary_y as f32,
            class_filter: self.class_filter.clone(),
            cooldown: self.alert_cooldown,
            identity_mode: self.identity_mode,
            strict_alternation: self.strict_alternation,
            max_idle_frames: self.max_idle_frames,
        }
    }
}

fn read_config_file(path: &Path) -> Result<GeofenceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_scripts() {
        let cfg = GeofenceConfig::default();
        assert_eq!(cfg.boundary_y, 400);
        assert_eq!(cfg.model_path, "yolov8n.onnx");
        assert!(cfg.persistence.enabled);
        assert_eq!(cfg.camera_label, "Camera 1");
        assert_eq!(cfg.identity_mode, IdentityMode::Tracked);
        assert!(cfg.class_filter.is_none());
        assert!(cfg.alert_cooldown.is_none());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = GeofenceConfig {
            confidence_threshold: 1.5,
            ..GeofenceConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = GeofenceConfig {
            class_filter: Some("  ".to_string()),
            ..GeofenceConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = GeofenceConfig {
            alert_cooldown: Some(Duration::MAX),
            ..GeofenceConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = GeofenceConfig {
            class_filter: Some(" Cow ".to_string()),
            ..GeofenceConfig::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.class_filter.as_deref(), Some("cow"));
    }

    #[test]
    fn validate_checks_persistence_endpoint() {
        for bad in [
            "ftp://store.example/alerts",
            "https://user:pw@store.example/alerts",
            "https://store.example/alerts?key=abc",
            "not a url",
        ] {
            let mut cfg = GeofenceConfig::default();
            cfg.persistence.endpoint = Some(bad.to_string());
            assert!(cfg.validate().is_err(), "{bad} accepted");
        }

        let mut cfg = GeofenceConfig::default();
        cfg.persistence.endpoint = Some("https://store.example/v1/alerts".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn monitor_settings_carry_config() {
        let cfg = GeofenceConfig {
            boundary_y: 300,
            alert_cooldown: Some(Duration::from_secs(5)),
            strict_alternation: true,
            ..GeofenceConfig::default()
        };
        let settings = cfg.monitor_settings();
        assert_eq!(settings.boundary_y, 300.0);
        assert_eq!(settings.cooldown, Some(Duration::from_secs(5)));
        assert!(settings.strict_alternation);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
