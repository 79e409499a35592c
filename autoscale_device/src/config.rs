//! Typed device configuration loaded from TOML.

use serde::Deserialize;

use crate::error::DeviceError;

/// Event-capture state machine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureCfg {
    /// IDLE polling cadence.
    pub idle_poll_ms: u64,
    /// Readings averaged per IDLE poll.
    pub idle_burst: u32,
    /// |EMA| must reach this to enter ACTIVE.
    pub trigger_kg: f64,
    /// ACTIVE ends after |kg| stays below this (hysteresis, < trigger_kg).
    pub release_kg: f64,
    /// How long |kg| must stay below release_kg to end ACTIVE.
    pub below_hold_ms: u64,
    /// Hard cap on one ACTIVE session.
    pub active_max_ms: u64,
    /// Capture buffer cap; later samples are dropped, not rotated.
    pub max_samples: usize,
    /// |EMA| band that counts as a quiet platform for arming.
    pub arm_band_kg: f64,
    /// Quiet time required before the trigger is armed.
    pub arm_stable_ms: u64,
    /// Minimum EMA rise per poll for the rising-edge trigger.
    pub rise_min_kg: f64,
    /// IDLE dwell after an event before arming can restart.
    pub post_active_cooldown_ms: u64,
    /// Converted readings inside this band are clamped to zero.
    pub deadband_kg: f64,
    /// Negate converted readings (reversed cell polarity).
    pub invert_sign: bool,
}

impl Default for CaptureCfg {
    fn default() -> Self {
        Self {
            idle_poll_ms: 200,
            idle_burst: 3,
            trigger_kg: 4.00,
            release_kg: 3.00,
            below_hold_ms: 2_000,
            active_max_ms: 90_000,
            max_samples: 6_000,
            arm_band_kg: 1.0,
            arm_stable_ms: 2_500,
            rise_min_kg: 0.20,
            post_active_cooldown_ms: 4_000,
            deadband_kg: 0.005,
            invert_sign: false,
        }
    }
}

/// Calibration procedure tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Compile-time fallback factor when nothing is persisted.
    pub default_counts_per_gram: f32,
    /// Raw reads averaged for a plain tare.
    pub tare_reads: u32,
    /// Raw reads averaged for the pre-calibration tare.
    pub cal_tare_reads: u32,
    pub tare_read_timeout_ms: u64,
    pub tare_total_timeout_ms: u64,
    /// Pause between "place the mass" and the stable read.
    pub settle_delay_ms: u64,
    pub stable_min_samples: u32,
    pub stable_max_samples: u32,
    pub stable_max_stddev_counts: f64,
    pub stable_min_duration_ms: u64,
    /// Sliding-window size for the settle gate, in raw reads.
    pub gate_window: u32,
    pub gate_max_stddev_counts: f64,
    /// Combined quiet time two consecutive gate windows must span.
    pub gate_min_stable_ms: u64,
    /// Overall budget per calibration phase.
    pub phase_timeout_ms: u64,
    /// Capture stays suppressed this long after any calibration op.
    pub cooldown_ms: u64,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            default_counts_per_gram: 9_863.233_33,
            tare_reads: 20,
            cal_tare_reads: 25,
            tare_read_timeout_ms: 500,
            tare_total_timeout_ms: 12_000,
            settle_delay_ms: 2_000,
            stable_min_samples: 20,
            stable_max_samples: 100,
            stable_max_stddev_counts: 800.0,
            stable_min_duration_ms: 1_200,
            gate_window: 16,
            gate_max_stddev_counts: 800.0,
            gate_min_stable_ms: 1_500,
            phase_timeout_ms: 60_000,
            cooldown_ms: 4_000,
        }
    }
}

/// Where captured events go.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportCfg {
    /// Ingest endpoint; when absent, events are logged and dropped.
    pub url: Option<String>,
    /// Shared secret for the x-function-secret header.
    pub secret: Option<String>,
    /// Stable device identifier sent as scale_id.
    pub scale_id: String,
}

impl Default for TransportCfg {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            scale_id: "SCALE-ESP32-DEV-001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Path to a .log file (JSON lines); console-only when absent.
    pub file: Option<String>,
    /// "trace".."error"
    pub level: Option<String>,
    /// "never" | "daily" | "hourly"
    pub rotation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub capture: CaptureCfg,
    pub calibration: CalibrationCfg,
    pub transport: TransportCfg,
    pub logging: Logging,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), DeviceError> {
        let c = &self.capture;
        if c.idle_poll_ms == 0 {
            return Err(DeviceError::InvalidConfig("idle_poll_ms must be >= 1"));
        }
        if c.idle_burst == 0 {
            return Err(DeviceError::InvalidConfig("idle_burst must be >= 1"));
        }
        if !(c.trigger_kg > 0.0) {
            return Err(DeviceError::InvalidConfig("trigger_kg must be > 0"));
        }
        if !(c.release_kg > 0.0) || c.release_kg >= c.trigger_kg {
            return Err(DeviceError::InvalidConfig(
                "release_kg must be > 0 and below trigger_kg",
            ));
        }
        if c.max_samples == 0 {
            return Err(DeviceError::InvalidConfig("max_samples must be >= 1"));
        }
        if c.rise_min_kg.is_sign_negative() || c.arm_band_kg.is_sign_negative() {
            return Err(DeviceError::InvalidConfig(
                "arm_band_kg and rise_min_kg must be >= 0",
            ));
        }
        if c.deadband_kg.is_sign_negative() {
            return Err(DeviceError::InvalidConfig("deadband_kg must be >= 0"));
        }
        let k = &self.calibration;
        if !(k.default_counts_per_gram.is_finite() && k.default_counts_per_gram != 0.0) {
            return Err(DeviceError::InvalidConfig(
                "default_counts_per_gram must be finite and non-zero",
            ));
        }
        if k.tare_reads == 0 || k.cal_tare_reads == 0 {
            return Err(DeviceError::InvalidConfig("tare_reads must be >= 1"));
        }
        if k.stable_min_samples == 0 || k.stable_max_samples < k.stable_min_samples {
            return Err(DeviceError::InvalidConfig(
                "stable sample bounds must satisfy 1 <= min <= max",
            ));
        }
        if k.gate_window < 2 {
            return Err(DeviceError::InvalidConfig("gate_window must be >= 2"));
        }
        Ok(())
    }
}

pub fn load_toml(s: &str) -> Result<DeviceConfig, toml::de::Error> {
    toml::from_str::<DeviceConfig>(s)
}
