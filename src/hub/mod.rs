//! Home-automation hub contract.
//!
//! The hub owns devices and their capabilities. The cooling engine only
//! consumes it through the [`Hub`] trait: enumerate devices, read and write
//! capability values, and (un)subscribe to value changes. Subscribed changes
//! and device topology changes arrive as [`HubEvent`]s on the channel handed
//! out by each adapter.

pub mod memory;
pub mod mqtt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryHub;
pub use mqtt::MqttHub;

/// Capability carrying the device's current thermostat mode.
pub const THERMOSTAT_MODE: &str = "thermostat_mode";
/// Capability carrying the device's target temperature (°C).
pub const TARGET_TEMPERATURE: &str = "target_temperature";
/// Prefix shared by every temperature measurement capability.
pub const MEASURE_TEMPERATURE: &str = "measure_temperature";
/// Explicit outdoor temperature measurement.
pub const OUTDOOR_TEMPERATURE: &str = "measure_temperature.outdoor";
/// Thermostat mode value that puts a device under automatic adjustment.
pub const MODE_COOL: &str = "cool";

/// Error types for hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capability {capability} not found on device {device}")]
    CapabilityNotFound { device: String, capability: String },

    #[error("No value reported yet for {capability} on device {device}")]
    ValueUnavailable { device: String, capability: String },

    #[error("Invalid value for {capability}: {value}")]
    InvalidValue { capability: String, value: String },

    #[error("Hub transport error: {0}")]
    Transport(String),
}

impl HubError {
    /// Whether the error means the device or capability no longer exists.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            HubError::DeviceNotFound(_) | HubError::CapabilityNotFound { .. }
        )
    }
}

/// A capability value as reported by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CapabilityValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CapabilityValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a thermostat mode value of "cool".
    pub fn is_cool(&self) -> bool {
        self.as_text() == Some(MODE_COOL)
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{b}"),
            CapabilityValue::Number(n) => write!(f, "{n}"),
            CapabilityValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        CapabilityValue::Number(value)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        CapabilityValue::Text(value.to_string())
    }
}

/// A declared capability of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

impl Capability {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    pub fn is_temperature_measurement(&self) -> bool {
        self.id.starts_with(MEASURE_TEMPERATURE)
    }
}

/// Device metadata from the hub directory. Live values are never cached here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub driver_id: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            driver_id: String::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_driver(mut self, driver_id: impl Into<String>) -> Self {
        self.driver_id = driver_id.into();
        self
    }

    pub fn with_capability(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        self.capabilities.push(Capability::new(id, title));
        self
    }

    pub fn capability(&self, id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.id == id)
    }

    pub fn has_capability(&self, id: &str) -> bool {
        self.capability(id).is_some()
    }

    /// Exposes both the mode and the setpoint needed for cooling management.
    pub fn is_cooling_capable(&self) -> bool {
        self.has_capability(THERMOSTAT_MODE) && self.has_capability(TARGET_TEMPERATURE)
    }
}

/// Handle of a live capability subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inbound events delivered by a hub adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A subscribed capability changed value.
    CapabilityChanged {
        device_id: String,
        capability_id: String,
        value: CapabilityValue,
    },
    DeviceAdded { device_id: String },
    DeviceRemoved { device_id: String },
}

impl HubEvent {
    /// Device topology changes, which trigger a debounced reload.
    pub fn is_topology_change(&self) -> bool {
        matches!(
            self,
            HubEvent::DeviceAdded { .. } | HubEvent::DeviceRemoved { .. }
        )
    }
}

/// Narrow device-directory and capability API consumed by the engine.
#[async_trait]
pub trait Hub: Send + Sync {
    /// Enumerate all devices known to the hub.
    async fn devices(&self) -> Result<Vec<Device>, HubError>;

    /// One-shot read of a capability's current value.
    async fn capability_value(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<CapabilityValue, HubError>;

    /// Write a capability value.
    async fn set_capability_value(
        &self,
        device_id: &str,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Result<(), HubError>;

    /// Start receiving `CapabilityChanged` events for a capability.
    async fn subscribe(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<SubscriptionId, HubError>;

    /// Stop a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), HubError>;
}
