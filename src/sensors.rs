//! Candidate outdoor temperature sources for the settings page.

use crate::hub::{Device, OUTDOOR_TEMPERATURE};
use serde::{Deserialize, Serialize};

/// A selectable temperature measurement capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSensor {
    /// `deviceId:capabilityId`, the value stored as `capabilityPath`.
    pub capability_path: String,
    /// Display label, `"<device> - <capability>"`.
    pub capability_name: String,
}

/// List every temperature measurement capability across `devices`.
///
/// A device exposing an explicit outdoor temperature contributes only that
/// capability. The result is sorted by display label.
pub fn temperature_sensors(devices: &[Device]) -> Vec<TemperatureSensor> {
    let mut sensors: Vec<TemperatureSensor> = devices
        .iter()
        .flat_map(|device| {
            let prefer_outdoor = device.has_capability(OUTDOOR_TEMPERATURE);
            device
                .capabilities
                .iter()
                .filter(|c| c.is_temperature_measurement())
                .filter(move |c| !prefer_outdoor || c.id == OUTDOOR_TEMPERATURE)
                .map(move |c| {
                    let title = if c.title.is_empty() { &c.id } else { &c.title };
                    TemperatureSensor {
                        capability_path: format!("{}:{}", device.id, c.id),
                        capability_name: format!("{} - {}", device.name, title),
                    }
                })
        })
        .collect();
    sensors.sort_by(|a, b| {
        a.capability_name
            .cmp(&b.capability_name)
            .then_with(|| a.capability_path.cmp(&b.capability_path))
    });
    sensors
}
