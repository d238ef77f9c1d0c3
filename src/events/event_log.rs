//! Event sink shared by the engine components.

use super::{CapabilityLabel, EventKind, ListenerEvent, MessageCatalog};
use crate::settings::{SettingsStore, TimestampedLog};
use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the live broadcast channel.
const BROADCAST_CAPACITY: usize = 64;

/// Renders, logs, persists and broadcasts listener events.
#[derive(Clone)]
pub struct EventLog {
    settings: Arc<SettingsStore>,
    catalog: Arc<dyn MessageCatalog>,
    history_limit: usize,
    tx: broadcast::Sender<TimestampedLog>,
}

impl EventLog {
    pub fn new(
        settings: Arc<SettingsStore>,
        catalog: Arc<dyn MessageCatalog>,
        history_limit: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            settings,
            catalog,
            history_limit,
            tx,
        }
    }

    /// Capability label from the message catalog.
    pub fn label(&self, label: CapabilityLabel) -> String {
        self.catalog.label(label)
    }

    pub fn push(&self, event: ListenerEvent) {
        let message = self.catalog.message(&event);
        match event.kind {
            EventKind::Error => error!("[Engine] {}", message),
            _ => info!("[Engine] {}", message),
        }

        let entry = TimestampedLog {
            time: Utc::now().timestamp_millis(),
            category: event.kind.to_string(),
            message,
        };
        self.settings.push_log(entry.clone(), self.history_limit);
        // No live listeners is fine
        let _ = self.tx.send(entry);
    }

    /// Report a runtime error on the stream.
    pub fn push_error(&self, message: impl Into<String>) {
        self.push(ListenerEvent::new(EventKind::Error).value(message));
    }

    /// Live feed of new entries.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedLog> {
        self.tx.subscribe()
    }
}
