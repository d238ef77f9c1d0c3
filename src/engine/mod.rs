//! Cooling engine.
//!
//! The [`Engine`] owns the outdoor temperature tracker and the controller
//! registry. It validates the configuration, (re)builds the set of managed
//! devices, routes capability updates to the tracker or the owning
//! controller and executes the effects a controller plans.
//!
//! The engine is driven by a single task (see [`Engine::spawn`]) so every
//! event is handled to completion before the next one is taken.

mod handle;

pub use handle::{Command, EngineHandle};

use crate::config::EngineConfig;
use crate::cooling::{
    target_temperature, ControllerRegistry, DeviceController, Effect, OutdoorSource,
    OutdoorTemperatureTracker,
};
use crate::error::{CoolingError, Result};
use crate::events::{celsius, CapabilityLabel, EventKind, EventLog, ListenerEvent, MessageCatalog};
use crate::hub::{CapabilityValue, Device, Hub, HubEvent, SubscriptionId, TARGET_TEMPERATURE, THERMOSTAT_MODE};
use crate::sensors::{temperature_sensors, TemperatureSensor};
use crate::settings::{CoolingConfig, SettingsStore};
use crate::thresholds::ThresholdStore;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Engine {
    hub: Arc<dyn Hub>,
    settings: Arc<SettingsStore>,
    thresholds: ThresholdStore,
    events: EventLog,
    tracker: OutdoorTemperatureTracker,
    registry: ControllerRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        hub: Arc<dyn Hub>,
        settings: Arc<SettingsStore>,
        catalog: Arc<dyn MessageCatalog>,
        config: EngineConfig,
    ) -> Self {
        let events = EventLog::new(settings.clone(), catalog, config.log_history_limit);
        Self {
            hub,
            thresholds: ThresholdStore::new(settings.clone()),
            settings,
            events,
            tracker: OutdoorTemperatureTracker::new(),
            registry: ControllerRegistry::new(),
            config,
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &OutdoorTemperatureTracker {
        &self.tracker
    }

    /// Validate and apply a configuration submitted by the settings page.
    ///
    /// Validation failures are returned without touching the running state.
    /// A valid configuration is persisted even when its outdoor source
    /// cannot be resolved, so the settings page shows what was attempted.
    pub async fn auto_adjust_cooling(&mut self, config: CoolingConfig) -> Result<()> {
        config.validate()?;

        self.destroy_all().await;
        if self.settings.set_config(&config) {
            debug!("[Engine] Configuration saved: {:?}", config);
        }
        if config.capability_path.is_empty() {
            return Ok(());
        }

        let source = self.resolve_source(&config).await?;
        info!(
            "[Engine] Outdoor source {}:{} ({})",
            source.device_id, source.capability_id, source.device_name
        );
        self.tracker.set_source(Some(source));

        if config.enabled
            && let Err(e) = self.rebuild().await
        {
            if matches!(e, CoolingError::SourceUnavailable(_)) {
                self.destroy_all().await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Re-apply the persisted configuration. Failures end up on the event
    /// stream.
    pub async fn reload(&mut self) {
        let config = self.settings.config();
        debug!("[Engine] Reloading with {:?}", config);
        if let Err(e) = self.auto_adjust_cooling(config).await {
            self.report(&e);
        }
    }

    /// Candidate outdoor temperature sources.
    pub async fn list_temperature_sensors(&self) -> Result<Vec<TemperatureSensor>> {
        let devices = self.hub.devices().await?;
        if !devices.iter().any(Device::is_cooling_capable) {
            return Err(CoolingError::NoManagedDevices);
        }
        Ok(temperature_sensors(&devices))
    }

    /// Tear down every subscription and forget the outdoor source.
    ///
    /// Cooling-managed devices are reverted to their thresholds.
    pub async fn destroy_all(&mut self) {
        self.events.push(ListenerEvent::new(EventKind::CleanedAll));
        self.destroy_controllers().await;
        self.tracker.teardown(self.hub.as_ref(), &self.events).await;
        self.tracker.set_source(None);
    }

    /// Final teardown before the process exits.
    pub async fn shutdown(&mut self) {
        info!("[Engine] Shutting down");
        self.destroy_all().await;
    }

    /// Route a capability update to the tracker or the owning controller.
    ///
    /// Errors are reported on the event stream. Losing the outdoor source
    /// tears everything down.
    pub async fn handle_hub_event(&mut self, event: HubEvent) {
        let HubEvent::CapabilityChanged {
            device_id,
            capability_id,
            value,
        } = event
        else {
            return;
        };

        if let Err(e) = self
            .on_capability_changed(&device_id, &capability_id, &value)
            .await
        {
            self.report(&e);
            if matches!(e, CoolingError::SourceUnavailable(_)) {
                self.destroy_all().await;
            }
        }
    }

    async fn on_capability_changed(
        &mut self,
        device_id: &str,
        capability_id: &str,
        value: &CapabilityValue,
    ) -> Result<()> {
        if self.tracker.matches(device_id, capability_id) {
            if self.tracker.record(value, &self.events).is_some() {
                self.on_outdoor_temperature().await;
            }
            return Ok(());
        }

        let Some(name) = self
            .registry
            .get(device_id)
            .map(|c| c.device_name().to_string())
        else {
            return Ok(());
        };

        let effects = match capability_id {
            THERMOSTAT_MODE => {
                self.events.push(
                    ListenerEvent::new(EventKind::Listened)
                        .name(&name)
                        .capability(self.events.label(CapabilityLabel::ThermostatMode))
                        .value(value.to_string()),
                );
                self.registry
                    .get(device_id)
                    .map(|c| c.on_thermostat_mode(value))
                    .unwrap_or_default()
            }
            TARGET_TEMPERATURE => {
                let Some(target) = value.as_number() else {
                    warn!("[Engine] {}: ignoring target temperature {}", name, value);
                    return Ok(());
                };
                let effects = self
                    .registry
                    .get_mut(device_id)
                    .map(|c| c.on_target_temperature(target))
                    .unwrap_or_default();
                if !effects.is_empty() {
                    self.events.push(
                        ListenerEvent::new(EventKind::Listened)
                            .name(&name)
                            .capability(self.events.label(CapabilityLabel::Temperature))
                            .value(celsius(target)),
                    );
                }
                effects
            }
            _ => return Ok(()),
        };
        self.run_effects(device_id, effects).await
    }

    async fn run_effects(&mut self, device_id: &str, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::StartCooling => self.start_cooling(device_id).await?,
                Effect::StopCooling { subscription } => {
                    self.stop_cooling(device_id, subscription).await
                }
                Effect::ReleaseOutdoorIfIdle => self.release_outdoor_if_idle(device_id).await,
                Effect::ApplyOverride(value) => self.apply_override(device_id, value).await,
                Effect::ReleaseMode { subscription } => self.release_mode(device_id, subscription).await,
            }
        }
        Ok(())
    }

    /// Recompute every cooling-managed device after an outdoor reading.
    async fn on_outdoor_temperature(&mut self) {
        for device_id in self.registry.cooling_ids() {
            self.push_target_temperature(&device_id).await;
        }
    }

    async fn resolve_source(&self, config: &CoolingConfig) -> Result<OutdoorSource> {
        let (device_id, capability_id) = config
            .source()
            .ok_or_else(|| CoolingError::NotFound(config.capability_path.clone()))?;
        let devices = self.hub.devices().await?;
        let device = devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| CoolingError::NotFound(format!("device {device_id}")))?;
        let capability = device.capability(capability_id).ok_or_else(|| {
            CoolingError::NotFound(format!("capability {capability_id} on {}", device.name))
        })?;
        Ok(OutdoorSource {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            capability_id: capability.id.clone(),
            capability_title: capability.title.clone(),
        })
    }

    fn is_eligible(&self, device: &Device) -> bool {
        if !device.is_cooling_capable() {
            return false;
        }
        if let Some(driver) = &self.config.managed_driver_id
            && device.driver_id != *driver
        {
            return false;
        }
        self.tracker
            .source()
            .is_none_or(|source| source.device_id != device.id)
    }

    /// Replace all controllers with one per eligible device.
    async fn rebuild(&mut self) -> Result<()> {
        self.destroy_controllers().await;
        self.tracker.teardown(self.hub.as_ref(), &self.events).await;

        let devices = self.hub.devices().await?;
        let eligible: Vec<Device> = devices.into_iter().filter(|d| self.is_eligible(d)).collect();
        if eligible.is_empty() {
            info!("[Engine] No device to manage");
        }
        for device in &eligible {
            match self.create_controller(device).await {
                Ok(()) => {}
                Err(e @ CoolingError::SourceUnavailable(_)) => return Err(e),
                Err(e) => self.report(&e),
            }
        }
        info!(
            "[Engine] Managing {} device(s), {} cooling",
            self.registry.len(),
            self.registry.cooling_count()
        );
        Ok(())
    }

    async fn create_controller(&mut self, device: &Device) -> Result<()> {
        let mode = self.hub.capability_value(&device.id, THERMOSTAT_MODE).await?;
        let subscription = self.hub.subscribe(&device.id, THERMOSTAT_MODE).await?;
        self.registry
            .insert(DeviceController::new(device, subscription));
        self.events.push(
            ListenerEvent::new(EventKind::Created)
                .name(&device.name)
                .capability(self.events.label(CapabilityLabel::ThermostatMode)),
        );

        if mode.is_cool() {
            self.start_cooling(&device.id).await?;
        }
        Ok(())
    }

    async fn destroy_controllers(&mut self) {
        for device_id in self.registry.ids() {
            self.destroy_controller(&device_id).await;
        }
    }

    async fn destroy_controller(&mut self, device_id: &str) {
        let Some(effects) = self.registry.get(device_id).map(DeviceController::on_destroy) else {
            return;
        };
        // Destroy effects never fail
        let _ = self.run_effects(device_id, effects).await;
        if let Some(mut controller) = self.registry.remove(device_id) {
            controller.retire();
            self.events.push(
                ListenerEvent::new(EventKind::Cleaned)
                    .name(controller.device_name())
                    .capability(self.events.label(CapabilityLabel::ThermostatMode)),
            );
        }
    }

    /// `ModeOnly -> ModeAndTemperature`.
    async fn start_cooling(&mut self, device_id: &str) -> Result<()> {
        self.tracker
            .ensure_subscribed(self.hub.as_ref(), &self.events)
            .await?;

        if let Err(e) = self.observe_target(device_id).await {
            // The device stays ModeOnly, it must not keep the outdoor subscription alive
            self.release_outdoor_if_idle(device_id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Adopt the current setpoint, push a target and subscribe to the target.
    async fn observe_target(&mut self, device_id: &str) -> Result<()> {
        match self.hub.capability_value(device_id, TARGET_TEMPERATURE).await {
            Ok(current) => match current.as_number() {
                Some(value) => self.update_threshold(device_id, value),
                None => warn!("[Engine] {}: ignoring target temperature {}", device_id, current),
            },
            Err(e) if e.is_missing() => return Err(e.into()),
            Err(e) => warn!("[Engine] {}: keeping stored threshold ({})", device_id, e),
        }
        self.push_target_temperature(device_id).await;

        let subscription = match self.hub.subscribe(device_id, TARGET_TEMPERATURE).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Some(name) = self
                    .registry
                    .get(device_id)
                    .map(|c| c.device_name().to_string())
                {
                    self.revert_temperature(device_id, &name).await;
                }
                return Err(e.into());
            }
        };
        let Some(controller) = self.registry.get_mut(device_id) else {
            // Controller vanished while subscribing
            let _ = self.hub.unsubscribe(subscription).await;
            return Ok(());
        };
        controller.enter_cooling(subscription);
        let name = controller.device_name().to_string();
        self.events.push(
            ListenerEvent::new(EventKind::Created)
                .name(name)
                .capability(self.events.label(CapabilityLabel::Temperature)),
        );
        Ok(())
    }

    /// `ModeAndTemperature -> ModeOnly`, reverting the device to its threshold.
    async fn stop_cooling(&mut self, device_id: &str, subscription: SubscriptionId) {
        if let Err(e) = self.hub.unsubscribe(subscription).await {
            warn!("[Engine] Failed to unsubscribe {}: {}", subscription, e);
        }
        let Some(controller) = self.registry.get_mut(device_id) else {
            return;
        };
        controller.leave_cooling();
        let name = controller.device_name().to_string();
        self.events.push(
            ListenerEvent::new(EventKind::Cleaned)
                .name(&name)
                .capability(self.events.label(CapabilityLabel::Temperature)),
        );
        self.revert_temperature(device_id, &name).await;
    }

    async fn release_mode(&mut self, device_id: &str, subscription: SubscriptionId) {
        if let Err(e) = self.hub.unsubscribe(subscription).await {
            warn!(
                "[Engine] Failed to unsubscribe {} of {}: {}",
                subscription, device_id, e
            );
        }
    }

    /// Drop the outdoor subscription once nothing else needs it.
    async fn release_outdoor_if_idle(&mut self, device_id: &str) {
        if !self.tracker.is_subscribed()
            || self.registry.is_any_other_controller_cooling(device_id)
            || self
                .registry
                .is_any_other_device_cooling(self.hub.as_ref(), device_id)
                .await
        {
            return;
        }
        self.tracker.teardown(self.hub.as_ref(), &self.events).await;
    }

    /// A user-set target temperature becomes the new threshold.
    async fn apply_override(&mut self, device_id: &str, value: f64) {
        self.update_threshold(device_id, value);
        self.push_target_temperature(device_id).await;
    }

    fn update_threshold(&self, device_id: &str, value: f64) {
        if !self.thresholds.set(device_id, value) {
            return;
        }
        let name = self
            .registry
            .get(device_id)
            .map_or(device_id, DeviceController::device_name);
        self.events.push(
            ListenerEvent::new(EventKind::Saved)
                .name(name)
                .value(celsius(value)),
        );
    }

    /// Compute and write the clamped target. Write failures are reported and
    /// retried on the next trigger.
    async fn push_target_temperature(&mut self, device_id: &str) {
        let Some(name) = self
            .registry
            .get(device_id)
            .map(|c| c.device_name().to_string())
        else {
            return;
        };
        let threshold = self.thresholds.get(device_id);
        let outdoor = self.tracker.current_value();
        let target = target_temperature(threshold, outdoor);

        match self
            .hub
            .set_capability_value(device_id, TARGET_TEMPERATURE, target.into())
            .await
        {
            Ok(()) => {
                if let Some(controller) = self.registry.get_mut(device_id) {
                    controller.record_target(target);
                }
                self.events.push(
                    ListenerEvent::new(EventKind::Calculated)
                        .name(name)
                        .value(celsius(target))
                        .threshold(threshold)
                        .outdoor_temperature(outdoor),
                );
            }
            Err(e) => self.report(&CoolingError::WriteFailure {
                device: name,
                capability: TARGET_TEMPERATURE.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn revert_temperature(&mut self, device_id: &str, name: &str) {
        let threshold = self.thresholds.get(device_id);
        match self
            .hub
            .set_capability_value(device_id, TARGET_TEMPERATURE, threshold.into())
            .await
        {
            Ok(()) => self.events.push(
                ListenerEvent::new(EventKind::Reverted)
                    .name(name)
                    .value(celsius(threshold)),
            ),
            Err(e) => self.report(&CoolingError::WriteFailure {
                device: name.to_string(),
                capability: TARGET_TEMPERATURE.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn report(&self, error: &CoolingError) {
        self.events
            .push_error(format!("{} ({})", error, error.event_name()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EnglishCatalog;
    use crate::hub::{MemoryHub, OUTDOOR_TEMPERATURE};
    use crate::cooling::ControllerState;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    const OUTDOOR_PATH: &str = "station:measure_temperature.outdoor";

    fn station() -> Device {
        Device::new("station", "Weather station").with_capability(OUTDOOR_TEMPERATURE, "Outdoor temperature")
    }

    fn air_conditioner(id: &str, name: &str) -> Device {
        Device::new(id, name)
            .with_driver("melcloud")
            .with_capability(THERMOSTAT_MODE, "Thermostat mode")
            .with_capability(TARGET_TEMPERATURE, "Target temperature")
    }

    struct Fixture {
        hub: Arc<MemoryHub>,
        rx: mpsc::UnboundedReceiver<HubEvent>,
        settings: Arc<SettingsStore>,
        engine: Engine,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let (hub, rx) = MemoryHub::new();
            hub.insert_device(station(), vec![(OUTDOOR_TEMPERATURE, 25.0.into())]);
            let settings = Arc::new(SettingsStore::in_memory());
            let engine = Engine::new(hub.clone(), settings.clone(), Arc::new(EnglishCatalog), config);
            Self {
                hub,
                rx,
                settings,
                engine,
            }
        }

        fn add_ac(&self, id: &str, mode: &str, target: f64) {
            self.hub.insert_device(
                air_conditioner(id, &format!("AC {id}")),
                vec![(THERMOSTAT_MODE, mode.into()), (TARGET_TEMPERATURE, target.into())],
            );
        }

        async fn enable(&mut self) {
            assert_ok!(
                self.engine
                    .auto_adjust_cooling(CoolingConfig::new(OUTDOOR_PATH, true))
                    .await
            );
            self.pump().await;
        }

        /// Deliver queued capability events, including echoes they cause.
        async fn pump(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                if !event.is_topology_change() {
                    self.engine.handle_hub_event(event).await;
                }
            }
        }

        async fn set(&mut self, device_id: &str, capability_id: &str, value: impl Into<CapabilityValue>) {
            self.hub.set_value(device_id, capability_id, value).await;
            self.pump().await;
        }

        fn target(&self, device_id: &str) -> Option<f64> {
            self.hub
                .value(device_id, TARGET_TEMPERATURE)
                .and_then(|v| v.as_number())
        }

        fn outdoor_subscribed(&self) -> bool {
            self.hub.subscription_count("station", OUTDOOR_TEMPERATURE) == 1
        }

        fn count(&self, category: &str) -> usize {
            self.settings
                .last_logs()
                .iter()
                .filter(|l| l.category == category)
                .count()
        }
    }

    #[tokio::test]
    async fn test_threshold_then_outdoor_rise() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;

        assert_eq!(f.settings.threshold("ac-1"), Some(20.0));
        assert_eq!(f.target("ac-1"), Some(20.0));
        assert!(f.engine.registry().get("ac-1").is_some_and(|c| c.is_cooling()));

        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;
        assert_eq!(f.target("ac-1"), Some(22.0));
        assert_eq!(f.settings.threshold("ac-1"), Some(20.0));
    }

    #[tokio::test]
    async fn test_enabled_without_source_is_rejected() {
        let mut f = Fixture::new();
        let err = assert_err!(
            f.engine
                .auto_adjust_cooling(CoolingConfig::new("", true))
                .await
        );
        assert!(matches!(&err, CoolingError::Configuration(reason) if reason == "missing"));
        assert_eq!(err.event_name(), "error.missing");
        assert_eq!(f.settings.config(), CoolingConfig::default());
    }

    #[tokio::test]
    async fn test_unknown_source_is_persisted_and_reported() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);

        let attempted = CoolingConfig::new("ghost:measure_temperature", true);
        let err = assert_err!(f.engine.auto_adjust_cooling(attempted.clone()).await);
        assert!(matches!(err, CoolingError::NotFound(_)));
        assert_eq!(f.settings.config(), attempted);
        assert!(f.engine.registry().is_empty());

        let err = assert_err!(
            f.engine
                .auto_adjust_cooling(CoolingConfig::new("station:measure_temperature", true))
                .await
        );
        assert!(matches!(err, CoolingError::NotFound(_)));

        let err = assert_err!(
            f.engine
                .auto_adjust_cooling(CoolingConfig::new("station", true))
                .await
        );
        assert!(matches!(err, CoolingError::NotFound(_)));
        assert_eq!(f.hub.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_last_cooling_device_leaving_cool_releases_everything() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;
        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;
        assert_eq!(f.target("ac-1"), Some(22.0));

        f.set("ac-1", THERMOSTAT_MODE, "heat").await;

        assert_eq!(f.hub.subscription_count("ac-1", TARGET_TEMPERATURE), 0);
        assert_eq!(f.hub.subscription_count("ac-1", THERMOSTAT_MODE), 1);
        assert_eq!(f.target("ac-1"), Some(20.0));
        assert!(!f.outdoor_subscribed());
        assert_eq!(
            f.engine.registry().get("ac-1").map(|c| c.state()),
            Some(ControllerState::ModeOnly)
        );
        assert_eq!(f.count("target_temperature.reverted"), 1);
    }

    #[tokio::test]
    async fn test_outdoor_subscription_follows_cooling_devices() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.add_ac("ac-2", "heat", 24.0);
        f.enable().await;
        assert!(f.outdoor_subscribed());

        f.set("ac-2", THERMOSTAT_MODE, "cool").await;
        assert!(f.outdoor_subscribed());
        assert_eq!(f.engine.registry().cooling_count(), 2);

        f.set("ac-1", THERMOSTAT_MODE, "heat").await;
        assert!(f.outdoor_subscribed());

        f.set("ac-2", THERMOSTAT_MODE, "auto").await;
        assert!(!f.outdoor_subscribed());
        assert_eq!(f.engine.registry().cooling_count(), 0);

        f.set("ac-1", THERMOSTAT_MODE, "cool").await;
        assert!(f.outdoor_subscribed());
        assert_eq!(f.engine.registry().cooling_ids(), vec!["ac-1".to_string()]);

        // Redundant mode report while already cooling
        f.set("ac-1", THERMOSTAT_MODE, "cool").await;
        assert_eq!(f.hub.subscription_count("ac-1", TARGET_TEMPERATURE), 1);
        assert_eq!(f.hub.subscription_count("station", OUTDOOR_TEMPERATURE), 1);
    }

    #[tokio::test]
    async fn test_user_override_becomes_threshold() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;
        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;

        f.set("ac-1", TARGET_TEMPERATURE, 25.0).await;
        assert_eq!(f.settings.threshold("ac-1"), Some(25.0));
        assert_eq!(f.target("ac-1"), Some(25.0));

        f.set("ac-1", TARGET_TEMPERATURE, 18.0).await;
        assert_eq!(f.settings.threshold("ac-1"), Some(18.0));
        assert_eq!(f.target("ac-1"), Some(22.0));
        assert_eq!(
            f.hub.writes_to("ac-1", TARGET_TEMPERATURE).last(),
            Some(&CapabilityValue::Number(22.0))
        );
    }

    #[tokio::test]
    async fn test_own_write_echo_changes_nothing() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;
        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;

        let writes = f.hub.writes().len();
        let saved = f.count("target_temperature.saved");

        f.set("ac-1", TARGET_TEMPERATURE, 22.0).await;

        assert_eq!(f.hub.writes().len(), writes);
        assert_eq!(f.count("target_temperature.saved"), saved);
        assert_eq!(f.settings.threshold("ac-1"), Some(20.0));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_and_retried() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;

        f.hub.fail_writes("ac-1", true);
        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;
        assert_eq!(f.target("ac-1"), Some(20.0));
        assert_eq!(f.count("error"), 1);
        assert!(f.engine.registry().get("ac-1").is_some_and(|c| c.is_cooling()));

        f.hub.fail_writes("ac-1", false);
        f.set("station", OUTDOOR_TEMPERATURE, 31.0).await;
        assert_eq!(f.target("ac-1"), Some(23.0));
    }

    #[tokio::test]
    async fn test_disable_reverts_and_releases_all_subscriptions() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.add_ac("ac-2", "heat", 24.0);
        f.enable().await;
        f.set("station", OUTDOOR_TEMPERATURE, 32.0).await;
        assert_eq!(f.target("ac-1"), Some(24.0));

        assert_ok!(
            f.engine
                .auto_adjust_cooling(CoolingConfig::new(OUTDOOR_PATH, false))
                .await
        );

        assert_eq!(f.hub.total_subscriptions(), 0);
        assert!(f.engine.registry().is_empty());
        assert_eq!(f.target("ac-1"), Some(20.0));
        assert_eq!(f.target("ac-2"), Some(24.0));
        assert_eq!(f.settings.config(), CoolingConfig::new(OUTDOOR_PATH, false));
    }

    #[tokio::test]
    async fn test_teardown_twice_matches_once() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;

        f.engine.destroy_all().await;
        let cleaned = f.count("listener.cleaned");
        let reverted = f.count("target_temperature.reverted");
        let writes = f.hub.writes().len();

        f.engine.destroy_all().await;

        assert_eq!(f.count("listener.cleaned"), cleaned);
        assert_eq!(f.count("target_temperature.reverted"), reverted);
        assert_eq!(f.hub.writes().len(), writes);
        assert_eq!(f.hub.total_subscriptions(), 0);
        assert!(f.engine.tracker().source().is_none());
    }

    #[tokio::test]
    async fn test_vanished_outdoor_source_tears_down() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "heat", 20.0);
        f.enable().await;
        assert!(!f.outdoor_subscribed());

        f.hub.remove_device("station").await;
        f.set("ac-1", THERMOSTAT_MODE, "cool").await;

        assert!(f.engine.registry().is_empty());
        assert_eq!(f.hub.total_subscriptions(), 0);
        assert!(f.settings.last_logs().iter().any(|l| l.category == "error"
            && l.message.contains("error.source_unavailable")));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_devices() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;

        f.hub
            .add_device(
                air_conditioner("ac-2", "Office"),
                vec![(THERMOSTAT_MODE, "cool".into()), (TARGET_TEMPERATURE, 23.0.into())],
            )
            .await;
        f.engine.reload().await;
        f.pump().await;

        assert_eq!(f.engine.registry().ids(), vec!["ac-1", "ac-2"]);
        assert_eq!(f.engine.registry().cooling_count(), 2);
        assert_eq!(f.settings.threshold("ac-2"), Some(23.0));
        assert_eq!(f.hub.subscription_count("ac-1", THERMOSTAT_MODE), 1);
        assert_eq!(f.hub.subscription_count("station", OUTDOOR_TEMPERATURE), 1);

        f.hub.remove_device("ac-1").await;
        f.engine.reload().await;
        assert_eq!(f.engine.registry().ids(), vec!["ac-2"]);
    }

    #[tokio::test]
    async fn test_eligibility_filters() {
        let mut f = Fixture::with_config(EngineConfig {
            managed_driver_id: Some("melcloud".into()),
            ..EngineConfig::default()
        });
        f.add_ac("ac-1", "heat", 20.0);
        f.hub.insert_device(
            Device::new("ac-other", "Other brand")
                .with_driver("daikin")
                .with_capability(THERMOSTAT_MODE, "Thermostat mode")
                .with_capability(TARGET_TEMPERATURE, "Target temperature"),
            vec![(THERMOSTAT_MODE, "heat".into()), (TARGET_TEMPERATURE, 20.0.into())],
        );
        f.hub.insert_device(
            air_conditioner("ac-sensor", "AC with sensor").with_capability(OUTDOOR_TEMPERATURE, "Outdoor temperature"),
            vec![
                (THERMOSTAT_MODE, "heat".into()),
                (TARGET_TEMPERATURE, 20.0.into()),
                (OUTDOOR_TEMPERATURE, 28.0.into()),
            ],
        );

        assert_ok!(
            f.engine
                .auto_adjust_cooling(CoolingConfig::new("ac-sensor:measure_temperature.outdoor", true))
                .await
        );
        f.pump().await;

        assert_eq!(f.engine.registry().ids(), vec!["ac-1"]);
    }

    #[tokio::test]
    async fn test_list_temperature_sensors() {
        let f = Fixture::new();
        let err = assert_err!(f.engine.list_temperature_sensors().await);
        assert!(matches!(err, CoolingError::NoManagedDevices));
        assert_eq!(err.event_name(), "error.no_device");

        f.add_ac("ac-1", "heat", 20.0);
        let sensors = assert_ok!(f.engine.list_temperature_sensors().await);
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].capability_path, OUTDOOR_PATH);
        assert_eq!(sensors[0].capability_name, "Weather station - Outdoor temperature");
    }

    #[tokio::test]
    async fn test_events_carry_parameters() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;
        f.set("station", OUTDOOR_TEMPERATURE, 30.0).await;

        let logs = f.settings.last_logs();
        let calculated = logs
            .iter()
            .rev()
            .find(|l| l.category == "target_temperature.calculated");
        assert_eq!(
            calculated.map(|l| l.message.as_str()),
            Some("AC ac-1: target temperature set to 22\u{a0}°C (threshold 20\u{a0}°C, outdoor temperature 30\u{a0}°C)")
        );
        assert!(logs.iter().any(|l| l.category == "listener.listened"));
        assert!(f.count("listener.created") >= 3);
    }

    #[tokio::test]
    async fn test_spawned_engine_debounces_topology_changes() {
        let (hub, rx) = MemoryHub::new();
        hub.insert_device(station(), vec![(OUTDOOR_TEMPERATURE, 25.0.into())]);
        let settings = Arc::new(SettingsStore::in_memory());
        settings.set_config(&CoolingConfig::new(OUTDOOR_PATH, true));
        let engine = Engine::new(
            hub.clone(),
            settings.clone(),
            Arc::new(EnglishCatalog),
            EngineConfig {
                reload_delay_ms: 50,
                ..EngineConfig::default()
            },
        );
        let (handle, task) = engine.spawn(rx);
        let mut logs = handle.subscribe_logs();

        for id in ["ac-1", "ac-2", "ac-3"] {
            hub.add_device(
                air_conditioner(id, id),
                vec![(THERMOSTAT_MODE, "cool".into()), (TARGET_TEMPERATURE, 21.0.into())],
            )
            .await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let reloads = settings
            .last_logs()
            .iter()
            .filter(|l| l.category == "listener.cleaned_all")
            .count();
        assert_eq!(reloads, 1);
        assert_eq!(hub.subscription_count("ac-3", TARGET_TEMPERATURE), 1);
        assert_ok!(logs.try_recv());

        let sensors = assert_ok!(handle.list_temperature_sensors().await);
        assert_eq!(sensors.len(), 1);

        hub.set_value("ac-1", TARGET_TEMPERATURE, 19.0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(settings.threshold("ac-1"), Some(19.0));
        assert_ok!(handle.auto_adjust_cooling(CoolingConfig::new(OUTDOOR_PATH, true)).await);
        assert_eq!(settings.threshold("ac-1"), Some(19.0));

        assert_ok!(handle.shutdown().await);
        assert_ok!(task.await);
        assert_eq!(hub.total_subscriptions(), 0);
        assert!(matches!(
            handle.list_temperature_sensors().await,
            Err(CoolingError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn test_failed_target_subscription_releases_outdoor() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.hub.fail_subscriptions("ac-1", TARGET_TEMPERATURE, true);
        f.enable().await;

        assert_eq!(f.hub.subscription_count("station", OUTDOOR_TEMPERATURE), 0);
        assert_eq!(f.hub.subscription_count("ac-1", THERMOSTAT_MODE), 1);
        assert_eq!(
            f.engine.registry().get("ac-1").map(|c| c.state()),
            Some(ControllerState::ModeOnly)
        );
        assert_eq!(f.target("ac-1"), Some(20.0));
        assert_eq!(f.count("error"), 1);

        f.hub.fail_subscriptions("ac-1", TARGET_TEMPERATURE, false);
        f.set("ac-1", THERMOSTAT_MODE, "cool").await;
        assert!(f.outdoor_subscribed());
        assert!(f.engine.registry().get("ac-1").is_some_and(|c| c.is_cooling()));
    }

    #[tokio::test]
    async fn test_late_echo_of_earlier_write_changes_nothing() {
        let mut f = Fixture::new();
        f.add_ac("ac-1", "cool", 20.0);
        f.enable().await;
        let saved = f.count("target_temperature.saved");

        // Both readings are handled before the first echo arrives
        f.hub.set_value("station", OUTDOOR_TEMPERATURE, 30.0).await;
        f.hub.set_value("station", OUTDOOR_TEMPERATURE, 31.0).await;
        f.pump().await;

        assert_eq!(f.target("ac-1"), Some(23.0));
        assert_eq!(f.settings.threshold("ac-1"), Some(20.0));
        assert_eq!(f.count("target_temperature.saved"), saved);
    }

    #[tokio::test]
    async fn test_spawned_engine_survives_echo_bursts() {
        let (hub, rx) = MemoryHub::new();
        hub.insert_device(station(), vec![(OUTDOOR_TEMPERATURE, 25.0.into())]);
        let ids: Vec<String> = (0..300).map(|i| format!("ac-{i:03}")).collect();
        for id in &ids {
            hub.insert_device(
                air_conditioner(id, id),
                vec![(THERMOSTAT_MODE, "cool".into()), (TARGET_TEMPERATURE, 20.0.into())],
            );
        }
        let settings = Arc::new(SettingsStore::in_memory());
        settings.set_config(&CoolingConfig::new(OUTDOOR_PATH, true));
        let engine = Engine::new(
            hub.clone(),
            settings.clone(),
            Arc::new(EnglishCatalog),
            EngineConfig {
                reload_delay_ms: 10,
                ..EngineConfig::default()
            },
        );
        let (handle, task) = engine.spawn(rx);
        let wait = Duration::from_secs(5);

        let applied =
            tokio::time::timeout(wait, handle.auto_adjust_cooling(CoolingConfig::new(OUTDOOR_PATH, true)))
                .await;
        assert!(matches!(applied, Ok(Ok(()))));
        assert_eq!(hub.subscription_count("ac-299", TARGET_TEMPERATURE), 1);

        // Every cooling device echoes its new target back into the engine queue
        hub.set_value("station", OUTDOOR_TEMPERATURE, 35.0).await;
        let all_updated = tokio::time::timeout(wait, async {
            while !ids
                .iter()
                .all(|id| hub.value(id, TARGET_TEMPERATURE) == Some(CapabilityValue::Number(27.0)))
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert_ok!(all_updated);

        let sensors = tokio::time::timeout(wait, handle.list_temperature_sensors()).await;
        assert!(matches!(sensors, Ok(Ok(ref s)) if s.len() == 1));
        assert_eq!(settings.threshold("ac-150"), Some(20.0));

        assert_ok!(tokio::time::timeout(wait, handle.shutdown()).await);
        assert_ok!(task.await);
        assert_eq!(hub.total_subscriptions(), 0);
    }
}
