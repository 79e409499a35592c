//! Calibration engine: tare, settle gating, single- and two-point factor
//! solving, and persistence of the counts-per-gram factor.
//!
//! All waiting goes through the injected `Clock`; the serial console drives
//! these operations and the capture loop is suspended (and cooled down
//! afterwards) by the owning `Scale`.

use std::time::Duration;

use autoscale_traits::{CalStore, Clock, LoadCell};
use tracing::{info, warn};

use crate::config::CalibrationCfg;
use crate::error::DeviceError;
use crate::sampler::{read_stable_raw, StableRead};

pub const NVS_NAMESPACE: &str = "autoscale";
pub const NVS_KEY: &str = "cal";

/// Two recorded points for two-point calibration; cleared after `solve`.
#[derive(Debug, Default, Clone, Copy)]
struct TwoPoint {
    p1: Option<(i32, f64)>,
    p2: Option<(i32, f64)>,
}

/// Raw-counts → kilograms conversion state.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    pub counts_per_gram: f32,
    pub zero_counts: i32,
    pub invert_sign: bool,
    pub deadband_kg: f64,
}

impl Conversion {
    pub fn to_kg(&self, raw: i32) -> f64 {
        let grams = f64::from(raw - self.zero_counts) / f64::from(self.counts_per_gram);
        let mut kg = grams / 1000.0;
        if self.invert_sign {
            kg = -kg;
        }
        if kg.abs() < self.deadband_kg {
            kg = 0.0;
        }
        kg
    }
}

/// Outcome of a successful calibration, for console reporting.
#[derive(Debug, Clone, Copy)]
pub struct CalOutcome {
    pub counts_per_gram: f32,
    /// Post-calibration live reading, kilograms.
    pub check_kg: f64,
}

pub struct Calibrator {
    cfg: CalibrationCfg,
    pub conversion: Conversion,
    two_point: TwoPoint,
}

impl Calibrator {
    pub fn new(cfg: CalibrationCfg, invert_sign: bool, deadband_kg: f64) -> Self {
        let conversion = Conversion {
            counts_per_gram: cfg.default_counts_per_gram,
            zero_counts: 0,
            invert_sign,
            deadband_kg,
        };
        Self {
            cfg,
            conversion,
            two_point: TwoPoint::default(),
        }
    }

    /// Load a persisted factor if one exists; keep the compile-time default
    /// otherwise. Called once at boot.
    pub fn load_on_boot(&mut self, store: &dyn CalStore) -> Result<bool, DeviceError> {
        match store
            .load_f32(NVS_NAMESPACE, NVS_KEY)
            .map_err(|e| DeviceError::Store(e.to_string()))?
        {
            Some(factor) if factor.is_finite() && factor != 0.0 => {
                self.conversion.counts_per_gram = factor;
                info!(factor, "loaded persisted calibration factor");
                Ok(true)
            }
            Some(bad) => {
                warn!(factor = bad, "ignoring degenerate persisted factor");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Average `reads` raw samples to establish the zero offset.
    ///
    /// Budgets: each read waits at most `tare_read_timeout_ms`; the whole
    /// tare gives up after `tare_total_timeout_ms`. Failed reads are skipped;
    /// zero successes inside the budget is a `TareTimeout`.
    pub fn tare(
        &mut self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
        reads: u32,
    ) -> Result<i32, DeviceError> {
        let per_read = Duration::from_millis(self.cfg.tare_read_timeout_ms);
        let start = clock.now();
        let mut sum: i64 = 0;
        let mut n: u32 = 0;
        while n < reads.max(1) {
            if clock.ms_since(start) >= self.cfg.tare_total_timeout_ms {
                break;
            }
            match cell.read(per_read) {
                Ok(raw) => {
                    sum += i64::from(raw);
                    n += 1;
                }
                Err(e) => warn!(error = %e, "tare read skipped"),
            }
        }
        if n == 0 {
            return Err(DeviceError::TareTimeout);
        }
        let zero = (sum as f64 / f64::from(n)).round() as i32;
        self.conversion.zero_counts = zero;
        info!(zero, reads = n, "tare complete");
        Ok(zero)
    }

    /// Single-point calibration against a known mass in grams.
    ///
    /// Tares, refines the zero with the stable sampler, waits for the mass
    /// to be placed, gates on a settled platform, then solves
    /// `counts_per_gram = (raw - zero) / mass_g` and persists it.
    pub fn calibrate_single(
        &mut self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
        store: &mut dyn CalStore,
        mass_g: f64,
    ) -> Result<CalOutcome, DeviceError> {
        if !(mass_g > 0.0) {
            return Err(DeviceError::InvalidMass);
        }
        self.tare(cell, clock, self.cfg.cal_tare_reads)?;
        let zero = read_stable_raw(cell, clock, self.stable_read())?;
        self.conversion.zero_counts = zero;

        info!(mass_g, "place the known mass and keep it still");
        clock.sleep(Duration::from_millis(self.cfg.settle_delay_ms));
        self.settle_gate(cell, clock)?;

        let raw = read_stable_raw(cell, clock, self.stable_read())?;
        let factor = (f64::from(raw) - f64::from(zero)) / mass_g;
        self.adopt_factor(store, factor as f32)?;

        let check_kg = self.live_check(cell, clock)?;
        info!(
            raw,
            factor = self.conversion.counts_per_gram,
            check_kg,
            "single-point calibration saved"
        );
        Ok(CalOutcome {
            counts_per_gram: self.conversion.counts_per_gram,
            check_kg,
        })
    }

    /// Record the first two-point sample at the given mass.
    pub fn record_point1(
        &mut self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
        mass_g: f64,
    ) -> Result<i32, DeviceError> {
        let raw = self.record_point(cell, clock, mass_g)?;
        self.two_point.p1 = Some((raw, mass_g));
        Ok(raw)
    }

    /// Record the second two-point sample at the given mass.
    pub fn record_point2(
        &mut self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
        mass_g: f64,
    ) -> Result<i32, DeviceError> {
        let raw = self.record_point(cell, clock, mass_g)?;
        self.two_point.p2 = Some((raw, mass_g));
        Ok(raw)
    }

    fn record_point(
        &mut self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
        mass_g: f64,
    ) -> Result<i32, DeviceError> {
        if !(mass_g > 0.0) {
            return Err(DeviceError::InvalidMass);
        }
        clock.sleep(Duration::from_millis(self.cfg.settle_delay_ms));
        self.settle_gate(cell, clock)?;
        let mut stable = self.stable_read();
        stable.max_samples = stable.max_samples.max(120);
        read_stable_raw(cell, clock, stable)
    }

    /// Solve the two-point factor `(r2 - r1) / (m2 - m1)` and persist it.
    /// The recorded points are cleared on success.
    pub fn solve_two_point(&mut self, store: &mut dyn CalStore) -> Result<f32, DeviceError> {
        let (p1, p2) = match (self.two_point.p1, self.two_point.p2) {
            (Some(p1), Some(p2)) => (p1, p2),
            _ => return Err(DeviceError::MissingPoints),
        };
        let dm = p2.1 - p1.1;
        if dm.abs() < 1e-3 {
            return Err(DeviceError::DegenerateMasses);
        }
        let factor = f64::from(p2.0 - p1.0) / dm;
        self.adopt_factor(store, factor as f32)?;
        self.two_point = TwoPoint::default();
        info!(
            factor = self.conversion.counts_per_gram,
            "two-point calibration saved"
        );
        Ok(self.conversion.counts_per_gram)
    }

    /// Drop the persisted factor and return to the compile-time default.
    pub fn reset(&mut self, store: &mut dyn CalStore) -> Result<(), DeviceError> {
        store
            .remove(NVS_NAMESPACE, NVS_KEY)
            .map_err(|e| DeviceError::Store(e.to_string()))?;
        self.conversion.counts_per_gram = self.cfg.default_counts_per_gram;
        self.two_point = TwoPoint::default();
        info!(
            factor = self.conversion.counts_per_gram,
            "calibration reset to default"
        );
        Ok(())
    }

    /// Average a short burst and convert, for post-calibration reporting.
    pub fn live_check(
        &self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
    ) -> Result<f64, DeviceError> {
        let per_read = Duration::from_millis(self.cfg.tare_read_timeout_ms);
        let start = clock.now();
        let mut sum: i64 = 0;
        let mut n: u32 = 0;
        while n < 20 && clock.ms_since(start) < self.cfg.tare_total_timeout_ms {
            match cell.read(per_read) {
                Ok(raw) => {
                    sum += i64::from(raw);
                    n += 1;
                }
                Err(e) => warn!(error = %e, "check read skipped"),
            }
        }
        if n == 0 {
            return Err(DeviceError::TareTimeout);
        }
        let avg = (sum as f64 / f64::from(n)).round() as i32;
        Ok(self.conversion.to_kg(avg))
    }

    /// Require consecutive quiet raw windows whose means agree within
    /// `max(1% of |mean|, 2000 counts)` until their combined span covers
    /// `gate_min_stable_ms` (so at least two windows always). Aborts with
    /// `SettleTimeout` when the overall phase budget runs out; persistent
    /// state is untouched on abort.
    fn settle_gate(
        &self,
        cell: &mut dyn LoadCell,
        clock: &dyn Clock,
    ) -> Result<(), DeviceError> {
        let per_read = Duration::from_millis(self.cfg.tare_read_timeout_ms);
        let phase_start = clock.now();
        let window = self.cfg.gate_window.max(2) as usize;

        // (start of the agreeing run, mean of its latest window)
        let mut run: Option<(std::time::Instant, f64)> = None;
        loop {
            if clock.ms_since(phase_start) >= self.cfg.phase_timeout_ms {
                return Err(DeviceError::SettleTimeout(self.cfg.phase_timeout_ms));
            }
            let win_start = clock.now();
            let mut buf: Vec<i64> = Vec::with_capacity(window);
            while buf.len() < window {
                if clock.ms_since(phase_start) >= self.cfg.phase_timeout_ms {
                    return Err(DeviceError::SettleTimeout(self.cfg.phase_timeout_ms));
                }
                match cell.read(per_read) {
                    Ok(raw) => buf.push(i64::from(raw)),
                    Err(e) => warn!(error = %e, "settle-gate read skipped"),
                }
            }
            let mean = buf.iter().sum::<i64>() as f64 / buf.len() as f64;
            let sd = {
                let acc: f64 = buf
                    .iter()
                    .map(|&v| {
                        let d = v as f64 - mean;
                        d * d
                    })
                    .sum();
                (acc / (buf.len() - 1) as f64).sqrt()
            };

            if sd > self.cfg.gate_max_stddev_counts {
                run = None;
                continue;
            }
            match run {
                Some((start, prev_mean))
                    if (mean - prev_mean).abs() <= (0.01 * mean.abs()).max(2_000.0) =>
                {
                    if clock.ms_since(start) >= self.cfg.gate_min_stable_ms {
                        return Ok(());
                    }
                    run = Some((start, mean));
                }
                _ => run = Some((win_start, mean)),
            }
        }
    }

    fn adopt_factor(
        &mut self,
        store: &mut dyn CalStore,
        factor: f32,
    ) -> Result<(), DeviceError> {
        if !factor.is_finite() || factor == 0.0 {
            return Err(DeviceError::DegenerateFactor);
        }
        store
            .save_f32(NVS_NAMESPACE, NVS_KEY, factor)
            .map_err(|e| DeviceError::Store(e.to_string()))?;
        self.conversion.counts_per_gram = factor;
        Ok(())
    }

    fn stable_read(&self) -> StableRead {
        StableRead {
            min_samples: self.cfg.stable_min_samples,
            max_samples: self.cfg.stable_max_samples,
            max_stddev_counts: self.cfg.stable_max_stddev_counts,
            min_duration_ms: self.cfg.stable_min_duration_ms,
            read_timeout_ms: self.cfg.tare_read_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_applies_zero_scale_deadband_and_sign() {
        let mut c = Conversion {
            counts_per_gram: 1_000.0,
            zero_counts: 500,
            invert_sign: false,
            deadband_kg: 0.005,
        };
        // (5_000_500 - 500) / 1000 g = 5000 g = 5 kg
        assert_eq!(c.to_kg(5_000_500), 5.0);
        // 2 g -> 0.002 kg, inside the deadband
        assert_eq!(c.to_kg(2_500), 0.0);
        c.invert_sign = true;
        assert_eq!(c.to_kg(5_000_500), -5.0);
    }
}
