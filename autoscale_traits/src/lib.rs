//! Trait seams between the AutoScale logic crates and the hardware they run on.
//!
//! Everything the device logic needs from the outside world comes through
//! these traits: raw counts from the load-cell ADC, monotonic time, and the
//! persistent store for the calibration factor. Backends live in
//! `autoscale_hardware`; tests substitute scripted implementations.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// A 24-bit load-cell ADC (HX711 or compatible).
///
/// `read` waits up to `timeout` for the converter's data-ready line and
/// returns the signed raw count. The ADC's native rate (10 or 80 SPS
/// depending on how the RATE pin is strapped) paces the caller; there is no
/// separate `is_ready` probe at this seam.
pub trait LoadCell {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>>;
}

/// Persistent namespace/key storage for the calibration factor.
///
/// Mirrors the NVS preferences API the firmware uses: one writer at a time,
/// reads of absent keys return `Ok(None)`, and `remove` of an absent key is
/// not an error.
pub trait CalStore {
    fn load_f32(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>>;

    fn save_f32(
        &mut self,
        namespace: &str,
        key: &str,
        value: f32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn remove(
        &mut self,
        namespace: &str,
        key: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
