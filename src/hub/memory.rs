//! In-process hub.
//!
//! Holds devices, capability values and subscriptions in memory. Writes to a
//! subscribed capability are echoed back as `CapabilityChanged` events, the
//! same way the real hub reports a value it just accepted. Used by the test
//! suite and by the `simulate` command.

use super::{CapabilityValue, Device, Hub, HubError, HubEvent, SubscriptionId};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

type CapabilityKey = (String, String);

#[derive(Default)]
struct MemoryState {
    devices: BTreeMap<String, Device>,
    values: HashMap<CapabilityKey, CapabilityValue>,
    subscriptions: BTreeMap<SubscriptionId, CapabilityKey>,
    next_subscription: u64,
    failing_writes: HashSet<String>,
    failing_subscriptions: HashSet<CapabilityKey>,
    writes: Vec<(String, String, CapabilityValue)>,
}

impl MemoryState {
    fn check_capability(&self, device_id: &str, capability_id: &str) -> Result<(), HubError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| HubError::DeviceNotFound(device_id.to_string()))?;
        if !device.has_capability(capability_id) {
            return Err(HubError::CapabilityNotFound {
                device: device_id.to_string(),
                capability: capability_id.to_string(),
            });
        }
        Ok(())
    }

    fn is_subscribed(&self, device_id: &str, capability_id: &str) -> bool {
        self.subscriptions
            .values()
            .any(|(d, c)| d == device_id && c == capability_id)
    }

    /// Store a value and return the change event if someone listens to it.
    fn store(
        &mut self,
        device_id: &str,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Option<HubEvent> {
        self.values.insert(
            (device_id.to_string(), capability_id.to_string()),
            value.clone(),
        );
        self.is_subscribed(device_id, capability_id)
            .then(|| HubEvent::CapabilityChanged {
                device_id: device_id.to_string(),
                capability_id: capability_id.to_string(),
                value,
            })
    }
}

/// Hub backed by in-memory tables.
pub struct MemoryHub {
    state: Mutex<MemoryState>,
    events: mpsc::UnboundedSender<HubEvent>,
}

impl MemoryHub {
    /// Create an empty hub and the receiving end of its event channel.
    ///
    /// The channel is unbounded: echoes of the engine's own writes land on the
    /// queue the engine drains, so a send must never wait on the receiver.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            state: Mutex::new(MemoryState::default()),
            events: tx,
        });
        (hub, rx)
    }

    /// Register a device with initial capability values, without notifying.
    pub fn insert_device(&self, device: Device, values: Vec<(&str, CapabilityValue)>) {
        let mut state = self.state.lock();
        for (capability_id, value) in values {
            state
                .values
                .insert((device.id.clone(), capability_id.to_string()), value);
        }
        state.devices.insert(device.id.clone(), device);
    }

    /// Register a device and announce it as a topology change.
    pub async fn add_device(&self, device: Device, values: Vec<(&str, CapabilityValue)>) {
        let device_id = device.id.clone();
        self.insert_device(device, values);
        self.emit(HubEvent::DeviceAdded { device_id });
    }

    /// Remove a device, its values and its subscriptions.
    pub async fn remove_device(&self, device_id: &str) {
        {
            let mut state = self.state.lock();
            state.devices.remove(device_id);
            state.values.retain(|(d, _), _| d != device_id);
            state.subscriptions.retain(|_, (d, _)| d != device_id);
        }
        self.emit(HubEvent::DeviceRemoved {
            device_id: device_id.to_string(),
        });
    }

    /// Change a value from outside the engine (user action, sensor report).
    pub async fn set_value(
        &self,
        device_id: &str,
        capability_id: &str,
        value: impl Into<CapabilityValue>,
    ) {
        let event = self.state.lock().store(device_id, capability_id, value.into());
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Current stored value, if any.
    pub fn value(&self, device_id: &str, capability_id: &str) -> Option<CapabilityValue> {
        self.state
            .lock()
            .values
            .get(&(device_id.to_string(), capability_id.to_string()))
            .cloned()
    }

    /// Number of live subscriptions on a capability.
    pub fn subscription_count(&self, device_id: &str, capability_id: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|(d, c)| d == device_id && c == capability_id)
            .count()
    }

    /// Total number of live subscriptions.
    pub fn total_subscriptions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Make every write to the given device fail (or succeed again).
    pub fn fail_writes(&self, device_id: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_writes.insert(device_id.to_string());
        } else {
            state.failing_writes.remove(device_id);
        }
    }

    /// Make subscribing to one capability of a device fail (or succeed again).
    pub fn fail_subscriptions(&self, device_id: &str, capability_id: &str, failing: bool) {
        let key = (device_id.to_string(), capability_id.to_string());
        let mut state = self.state.lock();
        if failing {
            state.failing_subscriptions.insert(key);
        } else {
            state.failing_subscriptions.remove(&key);
        }
    }

    /// Writes performed through the [`Hub`] trait, oldest first.
    pub fn writes(&self) -> Vec<(String, String, CapabilityValue)> {
        self.state.lock().writes.clone()
    }

    /// Writes to one capability of one device, oldest first.
    pub fn writes_to(&self, device_id: &str, capability_id: &str) -> Vec<CapabilityValue> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(d, c, _)| d == device_id && c == capability_id)
            .map(|(_, _, v)| v.clone())
            .collect()
    }

    fn emit(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            debug!("[Hub] Event receiver dropped");
        }
    }
}

#[async_trait]
impl Hub for MemoryHub {
    async fn devices(&self) -> Result<Vec<Device>, HubError> {
        Ok(self.state.lock().devices.values().cloned().collect())
    }

    async fn capability_value(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<CapabilityValue, HubError> {
        let state = self.state.lock();
        state.check_capability(device_id, capability_id)?;
        state
            .values
            .get(&(device_id.to_string(), capability_id.to_string()))
            .cloned()
            .ok_or_else(|| HubError::ValueUnavailable {
                device: device_id.to_string(),
                capability: capability_id.to_string(),
            })
    }

    async fn set_capability_value(
        &self,
        device_id: &str,
        capability_id: &str,
        value: CapabilityValue,
    ) -> Result<(), HubError> {
        let event = {
            let mut state = self.state.lock();
            state.check_capability(device_id, capability_id)?;
            if state.failing_writes.contains(device_id) {
                return Err(HubError::Transport(format!("device {device_id} unreachable")));
            }
            state.writes.push((
                device_id.to_string(),
                capability_id.to_string(),
                value.clone(),
            ));
            state.store(device_id, capability_id, value)
        };
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<SubscriptionId, HubError> {
        let mut state = self.state.lock();
        state.check_capability(device_id, capability_id)?;
        if state
            .failing_subscriptions
            .contains(&(device_id.to_string(), capability_id.to_string()))
        {
            return Err(HubError::Transport(format!(
                "subscription to {device_id}:{capability_id} refused"
            )));
        }
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state
            .subscriptions
            .insert(id, (device_id.to_string(), capability_id.to_string()));
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), HubError> {
        self.state.lock().subscriptions.remove(&subscription);
        Ok(())
    }
}
