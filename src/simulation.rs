//! Demo hub for trying the engine without a real hub.
//!
//! Populates a [`MemoryHub`] with a weather station and a few air
//! conditioners, then drifts the outdoor temperature and occasionally flips
//! a thermostat mode.

use crate::hub::{
    Device, MemoryHub, MEASURE_TEMPERATURE, OUTDOOR_TEMPERATURE, TARGET_TEMPERATURE,
    THERMOSTAT_MODE,
};
use log::info;
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Outdoor source of the demo hub, as a capability path.
pub const DEMO_OUTDOOR_PATH: &str = "weather-station:measure_temperature.outdoor";

const AIR_CONDITIONERS: [(&str, &str, &str, f64); 3] = [
    ("ac-living", "Living room", "cool", 21.0),
    ("ac-bedroom", "Bedroom", "heat", 19.0),
    ("ac-office", "Office", "cool", 23.0),
];

const MODES: [&str; 4] = ["cool", "heat", "auto", "off"];

/// Insert the demo devices.
pub fn populate(hub: &MemoryHub) {
    hub.insert_device(
        Device::new("weather-station", "Weather station")
            .with_capability(MEASURE_TEMPERATURE, "Temperature")
            .with_capability(OUTDOOR_TEMPERATURE, "Outdoor temperature"),
        vec![
            (MEASURE_TEMPERATURE, 24.0.into()),
            (OUTDOOR_TEMPERATURE, 27.0.into()),
        ],
    );
    for (id, name, mode, target) in AIR_CONDITIONERS {
        hub.insert_device(
            Device::new(id, name)
                .with_driver("demo")
                .with_capability(THERMOSTAT_MODE, "Thermostat mode")
                .with_capability(TARGET_TEMPERATURE, "Target temperature")
                .with_capability(MEASURE_TEMPERATURE, "Temperature"),
            vec![
                (THERMOSTAT_MODE, mode.into()),
                (TARGET_TEMPERATURE, target.into()),
                (MEASURE_TEMPERATURE, 26.0.into()),
            ],
        );
    }
}

/// Spawn a task that drifts the outdoor temperature every `period`.
///
/// Every tenth tick a random air conditioner switches to a random mode.
pub fn run_simulation(hub: Arc<MemoryHub>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        let mut outdoor: f64 = 27.0;
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            tick += 1;

            let delta = rand::thread_rng().gen_range(-1.5..=1.5);
            outdoor = (outdoor + delta).clamp(10.0, 45.0);
            let reading = (outdoor * 10.0).round() / 10.0;
            info!("[Sim] Outdoor temperature: {}", reading);
            hub.set_value("weather-station", OUTDOOR_TEMPERATURE, reading)
                .await;

            if tick % 10 == 0 {
                let (device, mode) = {
                    let mut rng = rand::thread_rng();
                    let (id, ..) = AIR_CONDITIONERS[rng.gen_range(0..AIR_CONDITIONERS.len())];
                    (id, MODES[rng.gen_range(0..MODES.len())])
                };
                info!("[Sim] {} switched to {}", device, mode);
                hub.set_value(device, THERMOSTAT_MODE, mode).await;
            }
        }
    })
}
