use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::{DetectionCapability, DetectorBackend};

/// Named detector backends available to a monitoring session.
///
/// The registry owns the backends until one is handed to a session with
/// [`BackendRegistry::take`].
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Name of a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn name_for_capability(&self, capability: DetectionCapability) -> Result<String> {
        if let Some(name) = &self.default_name {
            if self
                .backends
                .get(name)
                .is_some_and(|backend| backend.supports(capability))
            {
                return Ok(name.clone());
            }
        }

        self.backends
            .iter()
            .find(|(_, backend)| backend.supports(capability))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("no registered backend supports capability {:?}", capability))
    }

    /// Remove a backend from the registry and hand it to the caller.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let backend = self
            .backends
            .remove(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        if self.default_name.as_deref() == Some(name) {
            self.default_name = self.backends.keys().next().cloned();
        }
        Ok(backend)
    }

    /// Take the default backend.
    pub fn take_default(&mut self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.take(&name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{IouTracker, ScriptedBackend, TrackerSettings};

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::default());
        assert_eq!(registry.default_name(), Some("scripted"));
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn capability_lookup_skips_backends_without_it() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::default());
        registry.register(IouTracker::new(
            ScriptedBackend::default(),
            TrackerSettings::default(),
        ));

        assert_eq!(
            registry
                .name_for_capability(DetectionCapability::Tracking)
                .unwrap(),
            "iou_tracker"
        );
        assert_eq!(
            registry
                .name_for_capability(DetectionCapability::ObjectDetection)
                .unwrap(),
            "scripted"
        );

        let backend = registry.take("iou_tracker").unwrap();
        assert!(backend.supports(DetectionCapability::Tracking));
        assert!(registry
            .name_for_capability(DetectionCapability::Tracking)
            .is_err());
    }
}
