//! Per-device temperature controller.
//!
//! A controller always holds a thermostat-mode subscription and, while its
//! device is cooling, a target-temperature subscription:
//!
//! ```text
//!            mode == cool
//!  ModeOnly ──────────────▶ ModeAndTemperature
//!     ▲                            │
//!     └────────────────────────────┘
//!            mode != cool
//!
//!  any ── destroy ──▶ Destroyed
//! ```
//!
//! The planning methods inspect the current state and return the [`Effect`]s
//! the engine must carry out. The engine applies the matching state mutation
//! once the hub side of an effect succeeded. The only state they touch is the
//! echo bookkeeping of [`DeviceController::on_target_temperature`].

use super::formula::same_temperature;
use crate::hub::{CapabilityValue, Device, SubscriptionId};
use std::collections::VecDeque;

/// Writes kept for echo matching while their echo has not arrived.
const MAX_PENDING_ECHOES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Only the thermostat mode is observed.
    ModeOnly,
    /// Cooling-managed: the target temperature is observed too.
    ModeAndTemperature { temperature: SubscriptionId },
    /// Both subscriptions released.
    Destroyed,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Subscribe the outdoor tracker, adopt the current setpoint as threshold,
    /// push a target and start observing the target temperature.
    StartCooling,
    /// Release the temperature subscription and revert to the threshold.
    StopCooling { subscription: SubscriptionId },
    /// Tear down the outdoor subscription unless another device still cools.
    ReleaseOutdoorIfIdle,
    /// Adopt a user-set target temperature as threshold and recompute.
    ApplyOverride(f64),
    /// Release the thermostat mode subscription.
    ReleaseMode { subscription: SubscriptionId },
}

#[derive(Debug, Clone)]
pub struct DeviceController {
    device_id: String,
    device_name: String,
    mode_subscription: SubscriptionId,
    state: ControllerState,
    /// Last target temperature this controller wrote.
    last_target: Option<f64>,
    /// Writes made while observing the target, oldest first, not yet echoed.
    pending_echoes: VecDeque<f64>,
}

impl DeviceController {
    pub fn new(device: &Device, mode_subscription: SubscriptionId) -> Self {
        Self {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            mode_subscription,
            state: ControllerState::ModeOnly,
            last_target: None,
            pending_echoes: VecDeque::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_cooling(&self) -> bool {
        matches!(self.state, ControllerState::ModeAndTemperature { .. })
    }

    /// Plan the reaction to a thermostat mode update.
    pub fn on_thermostat_mode(&self, mode: &CapabilityValue) -> Vec<Effect> {
        match (self.state, mode.is_cool()) {
            (ControllerState::Destroyed, _) => Vec::new(),
            (ControllerState::ModeOnly, true) => vec![Effect::StartCooling],
            (ControllerState::ModeAndTemperature { .. }, true) => Vec::new(),
            (ControllerState::ModeOnly, false) => vec![Effect::ReleaseOutdoorIfIdle],
            (ControllerState::ModeAndTemperature { temperature }, false) => vec![
                Effect::StopCooling {
                    subscription: temperature,
                },
                Effect::ReleaseOutdoorIfIdle,
            ],
        }
    }

    /// Plan the reaction to a target temperature update.
    ///
    /// Echoes of the controller's own writes are ignored, including late
    /// echoes of earlier writes. Echoes arrive in write order, so a matching
    /// pending write also discards the older ones.
    pub fn on_target_temperature(&mut self, value: f64) -> Vec<Effect> {
        if !self.is_cooling() {
            return Vec::new();
        }
        if let Some(pos) = self
            .pending_echoes
            .iter()
            .position(|&written| same_temperature(written, value))
        {
            self.pending_echoes.drain(..=pos);
            return Vec::new();
        }
        match self.last_target {
            Some(own) if same_temperature(own, value) => Vec::new(),
            _ => vec![Effect::ApplyOverride(value)],
        }
    }

    /// Plan the teardown of the controller.
    pub fn on_destroy(&self) -> Vec<Effect> {
        match self.state {
            ControllerState::Destroyed => Vec::new(),
            ControllerState::ModeOnly => vec![Effect::ReleaseMode {
                subscription: self.mode_subscription,
            }],
            ControllerState::ModeAndTemperature { temperature } => vec![
                Effect::StopCooling {
                    subscription: temperature,
                },
                Effect::ReleaseMode {
                    subscription: self.mode_subscription,
                },
            ],
        }
    }

    pub fn enter_cooling(&mut self, temperature: SubscriptionId) {
        if self.state == ControllerState::ModeOnly {
            self.state = ControllerState::ModeAndTemperature { temperature };
        }
    }

    pub fn leave_cooling(&mut self) {
        if self.is_cooling() {
            self.state = ControllerState::ModeOnly;
            self.last_target = None;
            self.pending_echoes.clear();
        }
    }

    pub fn retire(&mut self) {
        self.state = ControllerState::Destroyed;
        self.last_target = None;
        self.pending_echoes.clear();
    }

    /// Remember a successful write for echo matching.
    pub fn record_target(&mut self, value: f64) {
        self.last_target = Some(value);
        if self.is_cooling() {
            if self.pending_echoes.len() == MAX_PENDING_ECHOES {
                self.pending_echoes.pop_front();
            }
            self.pending_echoes.push_back(value);
        }
    }
}
