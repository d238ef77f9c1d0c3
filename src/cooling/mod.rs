//! Cooling management core: target formula, outdoor tracker, per-device
//! controllers and their registry.

pub mod controller;
pub mod formula;
pub mod outdoor;
pub mod registry;

pub use controller::{ControllerState, DeviceController, Effect};
pub use formula::{target_temperature, MAX_TEMPERATURE, MAX_TEMPERATURE_GAP};
pub use outdoor::{OutdoorSource, OutdoorTemperatureTracker};
pub use registry::ControllerRegistry;
