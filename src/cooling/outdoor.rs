//! Outdoor temperature tracker.
//!
//! Owns at most one subscription to the configured outdoor temperature
//! capability. The subscription exists only while some device is being
//! cooling-managed; the engine drives [`ensure_subscribed`] and [`teardown`]
//! accordingly.
//!
//! [`ensure_subscribed`]: OutdoorTemperatureTracker::ensure_subscribed
//! [`teardown`]: OutdoorTemperatureTracker::teardown

use crate::error::{CoolingError, Result};
use crate::events::{celsius, CapabilityLabel, EventKind, EventLog, ListenerEvent};
use crate::hub::{CapabilityValue, Hub, SubscriptionId};
use log::{debug, warn};

/// Value reported before any reading was observed (°C).
pub const DEFAULT_OUTDOOR_TEMPERATURE: f64 = 0.0;

/// The configured outdoor temperature capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdoorSource {
    pub device_id: String,
    pub device_name: String,
    pub capability_id: String,
    pub capability_title: String,
}

impl OutdoorSource {
    /// Hub title of the capability, or its id when untitled.
    pub fn label(&self) -> String {
        if self.capability_title.is_empty() {
            self.capability_id.clone()
        } else {
            self.capability_title.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct OutdoorTemperatureTracker {
    source: Option<OutdoorSource>,
    subscription: Option<SubscriptionId>,
    value: Option<f64>,
}

impl OutdoorTemperatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<&OutdoorSource> {
        self.source.as_ref()
    }

    /// Replace the configured source. Callers tear down first.
    pub fn set_source(&mut self, source: Option<OutdoorSource>) {
        self.source = source;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Whether a capability update belongs to the live outdoor subscription.
    pub fn matches(&self, device_id: &str, capability_id: &str) -> bool {
        self.subscription.is_some()
            && self
                .source
                .as_ref()
                .is_some_and(|s| s.device_id == device_id && s.capability_id == capability_id)
    }

    /// Last observed value, or [`DEFAULT_OUTDOOR_TEMPERATURE`].
    pub fn current_value(&self) -> f64 {
        self.value.unwrap_or(DEFAULT_OUTDOOR_TEMPERATURE)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.value
    }

    /// Read the current value and subscribe, unless already subscribed.
    ///
    /// Fails with [`CoolingError::SourceUnavailable`] when no source is
    /// configured or the hub no longer knows it.
    pub async fn ensure_subscribed(&mut self, hub: &dyn Hub, events: &EventLog) -> Result<()> {
        if self.subscription.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .clone()
            .ok_or_else(|| CoolingError::SourceUnavailable("no outdoor source configured".into()))?;

        let unavailable = |e: crate::hub::HubError| {
            CoolingError::SourceUnavailable(format!(
                "{}:{}: {}",
                source.device_id, source.capability_id, e
            ))
        };

        let value = hub
            .capability_value(&source.device_id, &source.capability_id)
            .await
            .map_err(unavailable)?;
        match value.as_number() {
            Some(n) => self.value = Some(n),
            None => warn!("[Outdoor] Ignoring non-numeric reading {}", value),
        }

        let subscription = hub
            .subscribe(&source.device_id, &source.capability_id)
            .await
            .map_err(unavailable)?;
        self.subscription = Some(subscription);
        debug!(
            "[Outdoor] Subscribed to {} of {} ({})",
            source.label(),
            source.device_name,
            subscription
        );

        events.push(
            ListenerEvent::new(EventKind::Created)
                .name(&source.device_name)
                .capability(events.label(CapabilityLabel::OutdoorTemperature)),
        );
        Ok(())
    }

    /// Record a value delivered by the subscription.
    ///
    /// Returns the new reading when it is usable.
    pub fn record(&mut self, value: &CapabilityValue, events: &EventLog) -> Option<f64> {
        let Some(reading) = value.as_number() else {
            warn!("[Outdoor] Ignoring non-numeric reading {}", value);
            return None;
        };
        self.value = Some(reading);
        if let Some(source) = &self.source {
            events.push(
                ListenerEvent::new(EventKind::Listened)
                    .name(&source.device_name)
                    .capability(events.label(CapabilityLabel::OutdoorTemperature))
                    .value(celsius(reading)),
            );
        }
        Some(reading)
    }

    /// Cancel the subscription and forget the last reading. Idempotent.
    pub async fn teardown(&mut self, hub: &dyn Hub, events: &EventLog) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.value = None;
        if let Err(e) = hub.unsubscribe(subscription).await {
            warn!("[Outdoor] Failed to unsubscribe {}: {}", subscription, e);
        }
        debug!("[Outdoor] Subscription {} released", subscription);
        if let Some(source) = &self.source {
            events.push(
                ListenerEvent::new(EventKind::Cleaned)
                    .name(&source.device_name)
                    .capability(events.label(CapabilityLabel::OutdoorTemperature)),
            );
        }
    }
}
