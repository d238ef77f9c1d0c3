//! Per-device baseline target temperatures.

use crate::settings::SettingsStore;
use std::sync::Arc;

/// Threshold used for devices that never reported a target temperature.
pub const DEFAULT_THRESHOLD: f64 = 0.0;

/// Threshold store backed by the persisted settings document.
///
/// Entries are created or overwritten, never deleted.
#[derive(Clone)]
pub struct ThresholdStore {
    settings: Arc<SettingsStore>,
}

impl ThresholdStore {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    /// Threshold of a device in °C, or [`DEFAULT_THRESHOLD`] if none stored.
    pub fn get(&self, device_id: &str) -> f64 {
        self.settings
            .threshold(device_id)
            .unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Store a threshold. Returns whether the persisted value changed.
    pub fn set(&self, device_id: &str, value: f64) -> bool {
        self.settings.set_threshold(device_id, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_threshold_defaults_to_zero() {
        let store = ThresholdStore::new(Arc::new(SettingsStore::in_memory()));
        assert_eq!(store.get("ac-1"), 0.0);
    }

    #[test]
    fn test_set_overwrites() {
        let settings = Arc::new(SettingsStore::in_memory());
        let store = ThresholdStore::new(settings.clone());
        assert!(store.set("ac-1", 21.0));
        assert!(store.set("ac-1", 19.5));
        assert!(!store.set("ac-1", 19.5));
        assert_eq!(store.get("ac-1"), 19.5);
        assert_eq!(settings.snapshot().thresholds.len(), 1);
    }
}
