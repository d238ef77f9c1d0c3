//! MQTT-backed hub adapter.
//!
//! The hub publishes retained device descriptors and capability values under
//! a topic prefix (see [`topics`]). The adapter mirrors that directory
//! locally, answers one-shot reads from the mirror, publishes writes to the
//! `/set` topics and turns incoming publishes into [`HubEvent`]s.

mod client;
pub mod topics;

use self::client::{MqttClient, MqttEvent};
use self::topics::HubTopic;
use super::{CapabilityValue, Device, Hub, HubError, HubEvent, SubscriptionId};
use crate::config::MqttConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type CapabilityKey = (String, String);

/// Device descriptor as published on `<prefix>/<deviceId>/$device`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDescriptor {
    name: String,
    #[serde(default)]
    driver_id: String,
    #[serde(default)]
    capabilities: Vec<super::Capability>,
}

/// Local mirror of the hub directory.
#[derive(Default)]
struct Mirror {
    devices: BTreeMap<String, Device>,
    values: HashMap<CapabilityKey, CapabilityValue>,
    subscriptions: BTreeMap<SubscriptionId, CapabilityKey>,
    next_subscription: u64,
}

impl Mirror {
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

    /// Apply one retained publish, returning the event it produces, if any.
    fn ingest(&mut self, topic: HubTopic, payload: &str) -> Option<HubEvent> {
        match topic {
            HubTopic::Descriptor { device_id } => self.ingest_descriptor(device_id, payload),
            HubTopic::Value {
                device_id,
                capability_id,
            } => self.ingest_value(device_id, capability_id, payload),
        }
    }

    fn ingest_descriptor(&mut self, device_id: String, payload: &str) -> Option<HubEvent> {
        if payload.trim().is_empty() {
            self.devices.remove(&device_id)?;
            self.values.retain(|(d, _), _| *d != device_id);
            self.subscriptions.retain(|_, (d, _)| *d != device_id);
            return Some(HubEvent::DeviceRemoved { device_id });
        }

        let descriptor = match serde_json::from_str::<DeviceDescriptor>(payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("[MQTT] Failed to parse descriptor of {}: {}", device_id, e);
                return None;
            }
        };
        let device = Device {
            id: device_id.clone(),
            name: descriptor.name,
            driver_id: descriptor.driver_id,
            capabilities: descriptor.capabilities,
        };
        let is_new = self.devices.insert(device_id.clone(), device).is_none();
        is_new.then_some(HubEvent::DeviceAdded { device_id })
    }

    fn ingest_value(
        &mut self,
        device_id: String,
        capability_id: String,
        payload: &str,
    ) -> Option<HubEvent> {
        let value = serde_json::from_str::<CapabilityValue>(payload)
            .unwrap_or_else(|_| CapabilityValue::Text(payload.trim().to_string()));
        let key = (device_id, capability_id);
        if self.values.get(&key) == Some(&value) {
            return None;
        }
        self.values.insert(key.clone(), value.clone());

        let subscribed = self.subscriptions.values().any(|k| *k == key);
        let (device_id, capability_id) = key;
        subscribed.then_some(HubEvent::CapabilityChanged {
            device_id,
            capability_id,
            value,
        })
    }
}

/// Hub adapter speaking to the home-automation hub over MQTT.
pub struct MqttHub {
    client: AsyncClient,
    prefix: String,
    mirror: RwLock<Mirror>,
}

impl MqttHub {
    /// Connect to the broker and start mirroring the hub.
    ///
    /// Returns the adapter, the receiving end of its event channel and the
    /// handle of the background task driving the connection.
    ///
    /// The event channel is unbounded so the router never waits on the engine.
    /// The engine's own writes wait on the rumqttc request queue, which only
    /// drains while the router keeps forwarding.
    pub fn start(
        config: &MqttConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<HubEvent>, JoinHandle<()>) {
        let mqtt_client = MqttClient::new(config);
        let hub = Arc::new(Self {
            client: mqtt_client.client(),
            prefix: config.topic_prefix.clone(),
            mirror: RwLock::new(Mirror::default()),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (mqtt_tx, mut mqtt_rx) = mpsc::channel::<MqttEvent>(64);

        info!(
            "[MQTT] Connecting to {}:{} (prefix '{}')",
            config.broker_host, config.broker_port, config.topic_prefix
        );

        let router = hub.clone();
        let task = tokio::spawn(async move {
            let mqtt_loop = tokio::spawn(mqtt_client.run(mqtt_tx));

            while let Some(event) = mqtt_rx.recv().await {
                match event {
                    MqttEvent::Connected => router.subscribe_all(),
                    MqttEvent::Message(msg) => {
                        if let Some(hub_event) = router.ingest(&msg.topic, &msg.payload)
                            && event_tx.send(hub_event).is_err()
                        {
                            break;
                        }
                    }
                }
            }

            mqtt_loop.abort();
        });

        (hub, event_rx, task)
    }

    fn subscribe_all(&self) {
        let topic = topics::wildcard(&self.prefix);
        // The router also feeds the event loop, it must not wait on the request queue
        match self.client.try_subscribe(&topic, QoS::AtLeastOnce) {
            Ok(()) => info!("[MQTT] Subscribed to {}", topic),
            Err(e) => warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e),
        }
    }

    fn ingest(&self, topic: &str, payload: &str) -> Option<HubEvent> {
        let parsed = HubTopic::parse(&self.prefix, topic)?;
        self.mirror.write().ingest(parsed, payload)
    }

    /// Number of devices currently mirrored.
    pub fn device_count(&self) -> usize {
        self.mirror.read().devices.len()
    }
}

#[async_trait]
impl Hub for MqttHub {
    async fn devices(&self) -> Result<Vec<Device>, HubError> {
        Ok(self.mirror.read().devices.values().cloned().collect())
    }

    async fn capability_value(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<CapabilityValue, HubError> {
        let mirror = self.mirror.read();
        mirror.check_capability(device_id, capability_id)?;
        mirror
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
        self.mirror.read().check_capability(device_id, capability_id)?;
        let payload = serde_json::to_string(&value).map_err(|e| HubError::InvalidValue {
            capability: capability_id.to_string(),
            value: e.to_string(),
        })?;
        let topic = topics::set_topic(&self.prefix, device_id, capability_id);
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn subscribe(
        &self,
        device_id: &str,
        capability_id: &str,
    ) -> Result<SubscriptionId, HubError> {
        let mut mirror = self.mirror.write();
        mirror.check_capability(device_id, capability_id)?;
        mirror.next_subscription += 1;
        let id = SubscriptionId(mirror.next_subscription);
        mirror
            .subscriptions
            .insert(id, (device_id.to_string(), capability_id.to_string()));
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), HubError> {
        self.mirror.write().subscriptions.remove(&subscription);
        Ok(())
    }
}
