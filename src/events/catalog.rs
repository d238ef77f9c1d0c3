//! Human-readable rendering of listener events.

use super::{EventKind, EventParams, ListenerEvent};

/// Capability labels used in event parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityLabel {
    OutdoorTemperature,
    Temperature,
    ThermostatMode,
}

/// Localized messages for events and capability labels.
pub trait MessageCatalog: Send + Sync {
    fn label(&self, label: CapabilityLabel) -> String;

    fn message(&self, event: &ListenerEvent) -> String;
}

/// Built-in English catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishCatalog;

impl EnglishCatalog {
    fn template(kind: EventKind) -> &'static str {
        match kind {
            EventKind::Created => "{name}: {capability} listener created",
            EventKind::Cleaned => "{name}: {capability} listener cleaned",
            EventKind::CleanedAll => "All listeners cleaned",
            EventKind::Listened => "{name}: {capability} changed to {value}",
            EventKind::Calculated => {
                "{name}: target temperature set to {value} (threshold {threshold}, outdoor temperature {outdoorTemperature})"
            }
            EventKind::Reverted => "{name}: target temperature reverted to {value}",
            EventKind::Saved => "{name}: threshold saved as {value}",
            EventKind::Error => "{value}",
        }
    }
}

impl MessageCatalog for EnglishCatalog {
    fn label(&self, label: CapabilityLabel) -> String {
        match label {
            CapabilityLabel::OutdoorTemperature => "outdoor temperature",
            CapabilityLabel::Temperature => "target temperature",
            CapabilityLabel::ThermostatMode => "thermostat mode",
        }
        .to_string()
    }

    fn message(&self, event: &ListenerEvent) -> String {
        render(Self::template(event.kind), &event.params)
    }
}

/// Substitute `{param}` placeholders; missing parameters render as `-`.
pub fn render(template: &str, params: &EventParams) -> String {
    let fields = [
        ("{name}", &params.name),
        ("{capability}", &params.capability),
        ("{value}", &params.value),
        ("{threshold}", &params.threshold),
        ("{outdoorTemperature}", &params.outdoor_temperature),
    ];
    fields
        .into_iter()
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value.as_deref().unwrap_or("-"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::celsius;

    #[test]
    fn test_render_calculated() {
        let event = ListenerEvent::new(EventKind::Calculated)
            .name("Bedroom")
            .value(celsius(22.0))
            .threshold(20.0)
            .outdoor_temperature(30.0);
        assert_eq!(
            EnglishCatalog.message(&event),
            "Bedroom: target temperature set to 22\u{a0}°C (threshold 20\u{a0}°C, outdoor temperature 30\u{a0}°C)"
        );
    }

    #[test]
    fn test_missing_params_render_as_dash() {
        let event = ListenerEvent::new(EventKind::Created).name("Bedroom");
        assert_eq!(EnglishCatalog.message(&event), "Bedroom: - listener created");
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            EnglishCatalog.label(CapabilityLabel::ThermostatMode),
            "thermostat mode"
        );
        assert_eq!(
            EnglishCatalog.label(CapabilityLabel::OutdoorTemperature),
            "outdoor temperature"
        );
    }
}
