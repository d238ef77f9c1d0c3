//! Observability events.
//!
//! Every lifecycle step of the cooling engine is reported as a symbolic
//! [`ListenerEvent`] with a small parameter bag. The [`EventLog`] renders the
//! event through a [`MessageCatalog`], writes it to the log facade, appends
//! it to the persisted history and broadcasts it to live consumers.

mod catalog;
mod event_log;

pub use self::catalog::{CapabilityLabel, EnglishCatalog, MessageCatalog};
pub use self::event_log::EventLog;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// Symbolic event names, as stored in the log history `category` field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize,
)]
pub enum EventKind {
    #[strum(serialize = "listener.created")]
    #[serde(rename = "listener.created")]
    Created,
    #[strum(serialize = "listener.cleaned")]
    #[serde(rename = "listener.cleaned")]
    Cleaned,
    #[strum(serialize = "listener.cleaned_all")]
    #[serde(rename = "listener.cleaned_all")]
    CleanedAll,
    #[strum(serialize = "listener.listened")]
    #[serde(rename = "listener.listened")]
    Listened,
    #[strum(serialize = "target_temperature.calculated")]
    #[serde(rename = "target_temperature.calculated")]
    Calculated,
    #[strum(serialize = "target_temperature.reverted")]
    #[serde(rename = "target_temperature.reverted")]
    Reverted,
    #[strum(serialize = "target_temperature.saved")]
    #[serde(rename = "target_temperature.saved")]
    Saved,
    #[strum(serialize = "error")]
    #[serde(rename = "error")]
    Error,
}

/// Format a temperature the way the log stream displays it.
pub fn celsius(value: f64) -> String {
    format!("{value}\u{a0}°C")
}

/// Parameter bag attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdoor_temperature: Option<String>,
}

/// A symbolic event plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerEvent {
    pub kind: EventKind,
    pub params: EventParams,
}

impl ListenerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            params: EventParams::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.params.name = Some(name.into());
        self
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.params.capability = Some(capability.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.params.value = Some(value.into());
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.params.threshold = Some(celsius(threshold));
        self
    }

    pub fn outdoor_temperature(mut self, outdoor: f64) -> Self {
        self.params.outdoor_temperature = Some(celsius(outdoor));
        self
    }
}
