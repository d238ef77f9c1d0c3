//! Topic layout of the MQTT hub.
//!
//! ```text
//! <prefix>/<deviceId>/$device              retained device descriptor (JSON)
//! <prefix>/<deviceId>/<capabilityId>       retained capability value (JSON)
//! <prefix>/<deviceId>/<capabilityId>/set   write requests
//! ```

/// Topic segment carrying the device descriptor.
pub const DESCRIPTOR: &str = "$device";
/// Trailing segment of write requests.
pub const SET: &str = "set";

/// A parsed inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubTopic {
    Descriptor { device_id: String },
    Value { device_id: String, capability_id: String },
}

impl HubTopic {
    /// Parse a topic under `prefix`. Write requests and foreign topics yield `None`.
    pub fn parse(prefix: &str, topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let device_id = parts.next().filter(|s| !s.is_empty())?;
        let leaf = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        if leaf == DESCRIPTOR {
            Some(HubTopic::Descriptor {
                device_id: device_id.to_string(),
            })
        } else {
            Some(HubTopic::Value {
                device_id: device_id.to_string(),
                capability_id: leaf.to_string(),
            })
        }
    }
}

/// Wildcard subscription covering the whole hub.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}/#")
}

/// Topic a capability write is published to.
pub fn set_topic(prefix: &str, device_id: &str, capability_id: &str) -> String {
    format!("{prefix}/{device_id}/{capability_id}/{SET}")
}
