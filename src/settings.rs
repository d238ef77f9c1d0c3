//! Persisted settings document.
//!
//! Holds the cooling configuration, the per-device thresholds and the recent
//! log history in a single JSON document:
//!
//! ```json
//! {"capabilityPath": "...", "enabled": true, "thresholds": {"ac-1": 24}, "lastLogs": []}
//! ```
//!
//! The document is written back only when a value actually changes.

use crate::error::{CoolingError, Result};
use log::{error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Cooling configuration as submitted by the settings page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoolingConfig {
    /// Outdoor source, formatted `deviceId:capabilityId`, or empty.
    #[serde(default)]
    pub capability_path: String,
    #[serde(default)]
    pub enabled: bool,
}

impl CoolingConfig {
    pub fn new(capability_path: impl Into<String>, enabled: bool) -> Self {
        Self {
            capability_path: capability_path.into(),
            enabled,
        }
    }

    /// Enabling requires an outdoor source.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.capability_path.is_empty() {
            return Err(CoolingError::Configuration("missing".into()));
        }
        Ok(())
    }

    /// Split the capability path into `(deviceId, capabilityId)`.
    pub fn source(&self) -> Option<(&str, &str)> {
        self.capability_path
            .rsplit_once(':')
            .filter(|(device, capability)| !device.is_empty() && !capability.is_empty())
    }
}

/// One entry of the persisted log history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedLog {
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    /// Symbolic event name, e.g. `target_temperature.calculated`.
    pub category: String,
    pub message: String,
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSettings {
    #[serde(default)]
    pub capability_path: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_logs: Vec<TimestampedLog>,
}

impl PersistedSettings {
    /// Load from file
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedSettings>(&bytes) {
                Ok(settings) => {
                    info!(
                        "Loaded settings from {:?} ({} thresholds)",
                        path,
                        settings.thresholds.len()
                    );
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse settings file: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings found (first run)");
                Self::default()
            }
            Err(e) => {
                error!("Failed to read settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

/// Settings store with write-on-change persistence.
///
/// Without a path the store lives in memory only.
pub struct SettingsStore {
    path: Option<PathBuf>,
    state: RwLock<PersistedSettings>,
}

impl SettingsStore {
    /// Open the store backed by `path`, loading any existing document.
    pub fn open(path: PathBuf) -> Self {
        let state = PersistedSettings::load(&path);
        Self {
            path: Some(path),
            state: RwLock::new(state),
        }
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(PersistedSettings::default()),
        }
    }

    pub fn snapshot(&self) -> PersistedSettings {
        self.state.read().clone()
    }

    pub fn config(&self) -> CoolingConfig {
        let state = self.state.read();
        CoolingConfig {
            capability_path: state.capability_path.clone(),
            enabled: state.enabled,
        }
    }

    /// Persist the configuration. Returns whether anything changed.
    pub fn set_config(&self, config: &CoolingConfig) -> bool {
        self.update(|state| {
            let changed =
                state.capability_path != config.capability_path || state.enabled != config.enabled;
            state.capability_path.clone_from(&config.capability_path);
            state.enabled = config.enabled;
            changed
        })
    }

    pub fn threshold(&self, device_id: &str) -> Option<f64> {
        self.state.read().thresholds.get(device_id).copied()
    }

    /// Persist a threshold. Returns whether the stored value changed.
    pub fn set_threshold(&self, device_id: &str, value: f64) -> bool {
        self.update(|state| {
            let previous = state.thresholds.insert(device_id.to_string(), value);
            previous != Some(value)
        })
    }

    /// Append a log entry, keeping at most `limit` of the newest entries.
    pub fn push_log(&self, entry: TimestampedLog, limit: usize) {
        self.update(|state| {
            state.last_logs.push(entry);
            let excess = state.last_logs.len().saturating_sub(limit);
            state.last_logs.drain(..excess);
            true
        });
    }

    pub fn last_logs(&self) -> Vec<TimestampedLog> {
        self.state.read().last_logs.clone()
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedSettings) -> bool) -> bool {
        let mut state = self.state.write();
        let changed = apply(&mut state);
        if changed
            && let Some(path) = &self.path
            && let Err(e) = state.save(path)
        {
            error!("Failed to save settings: {}", e);
        }
        changed
    }
}
