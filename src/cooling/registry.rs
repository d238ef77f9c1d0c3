//! Registry of active device controllers.

use super::controller::DeviceController;
use crate::hub::{Hub, THERMOSTAT_MODE};
use log::warn;
use std::collections::BTreeMap;

/// Active controllers keyed by device id.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<String, DeviceController>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, controller: DeviceController) {
        self.controllers
            .insert(controller.device_id().to_string(), controller);
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceController> {
        self.controllers.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceController> {
        self.controllers.get_mut(device_id)
    }

    pub fn remove(&mut self, device_id: &str) -> Option<DeviceController> {
        self.controllers.remove(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.controllers.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    /// Devices currently in `ModeAndTemperature`.
    pub fn cooling_ids(&self) -> Vec<String> {
        self.controllers
            .values()
            .filter(|c| c.is_cooling())
            .map(|c| c.device_id().to_string())
            .collect()
    }

    pub fn cooling_count(&self) -> usize {
        self.controllers.values().filter(|c| c.is_cooling()).count()
    }

    /// Whether any controller other than `excluding` is cooling-managed.
    pub fn is_any_other_controller_cooling(&self, excluding: &str) -> bool {
        self.controllers
            .values()
            .any(|c| c.device_id() != excluding && c.is_cooling())
    }

    /// Whether any other registered device currently reads "cool".
    ///
    /// Uses fresh one-shot reads; a failed read counts as not cooling.
    pub async fn is_any_other_device_cooling(&self, hub: &dyn Hub, excluding: &str) -> bool {
        for device_id in self.controllers.keys().filter(|id| *id != excluding) {
            match hub.capability_value(device_id, THERMOSTAT_MODE).await {
                Ok(mode) if mode.is_cool() => return true,
                Ok(_) => {}
                Err(e) => warn!("[Engine] Could not read mode of {}: {}", device_id, e),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Device, MemoryHub, SubscriptionId, TARGET_TEMPERATURE};

    fn ac(id: &str) -> Device {
        Device::new(id, id)
            .with_capability(THERMOSTAT_MODE, "Thermostat mode")
            .with_capability(TARGET_TEMPERATURE, "Target temperature")
    }

    #[tokio::test]
    async fn test_other_device_cooling_uses_live_reads() {
        let (hub, _rx) = MemoryHub::new();
        hub.insert_device(ac("ac-1"), vec![(THERMOSTAT_MODE, "cool".into())]);
        hub.insert_device(ac("ac-2"), vec![(THERMOSTAT_MODE, "heat".into())]);

        let mut registry = ControllerRegistry::new();
        registry.insert(DeviceController::new(&ac("ac-1"), SubscriptionId(1)));
        registry.insert(DeviceController::new(&ac("ac-2"), SubscriptionId(2)));

        assert!(registry.is_any_other_device_cooling(hub.as_ref(), "ac-2").await);
        assert!(!registry.is_any_other_device_cooling(hub.as_ref(), "ac-1").await);

        hub.set_value("ac-2", THERMOSTAT_MODE, "cool").await;
        assert!(registry.is_any_other_device_cooling(hub.as_ref(), "ac-1").await);
    }

    #[test]
    fn test_cooling_bookkeeping() {
        let mut registry = ControllerRegistry::new();
        registry.insert(DeviceController::new(&ac("ac-1"), SubscriptionId(1)));
        registry.insert(DeviceController::new(&ac("ac-2"), SubscriptionId(2)));
        assert_eq!(registry.cooling_count(), 0);

        if let Some(c) = registry.get_mut("ac-1") {
            c.enter_cooling(SubscriptionId(3));
        }
        assert_eq!(registry.cooling_ids(), vec!["ac-1".to_string()]);
        assert!(registry.is_any_other_controller_cooling("ac-2"));
        assert!(!registry.is_any_other_controller_cooling("ac-1"));

        assert!(registry.remove("ac-1").is_some());
        assert_eq!(registry.ids(), vec!["ac-2".to_string()]);
    }
}
