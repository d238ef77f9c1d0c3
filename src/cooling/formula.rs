//! Target temperature calculation.

/// Upper bound of any computed target temperature (°C).
pub const MAX_TEMPERATURE: f64 = 38.0;

/// Largest allowed gap between outdoor temperature and target (°C).
pub const MAX_TEMPERATURE_GAP: f64 = 8.0;

/// Target temperature for a device.
///
/// Never below the user's threshold, never above [`MAX_TEMPERATURE`], and at
/// least `ceil(outdoor) - MAX_TEMPERATURE_GAP`.
pub fn target_temperature(threshold: f64, outdoor: f64) -> f64 {
    threshold
        .max(outdoor.ceil() - MAX_TEMPERATURE_GAP)
        .min(MAX_TEMPERATURE)
}

/// Equality for temperatures that went through a JSON round trip.
pub fn same_temperature(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
