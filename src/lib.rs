//! Cooling auto-adjust library.
//!
//! Keeps the cooling setpoint of climate devices within a band relative to
//! the outdoor temperature, while a user-set setpoint becomes the device's
//! new baseline threshold.

pub mod config;
pub mod cooling;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod sensors;
pub mod settings;
pub mod simulation;
pub mod thresholds;
