//! Stability-gated raw averaging.
//!
//! Both calibration paths want one denoised raw number, not a stream: keep
//! reading until the collected samples are quiet, or give up and average
//! what we have. Dispersion uses the sample standard deviation (n-1).

use std::time::Duration;

use autoscale_traits::{Clock, LoadCell};
use tracing::{debug, trace};

use crate::error::DeviceError;

/// Hard cap on the collection buffer, matching the firmware's static buffer.
const STABLE_BUF_CAP: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct StableRead {
    pub min_samples: u32,
    pub max_samples: u32,
    pub max_stddev_counts: f64,
    pub min_duration_ms: u64,
    /// Per-read wait on the ADC's data-ready line.
    pub read_timeout_ms: u64,
}

/// Collect raw samples until `n >= min_samples` and `elapsed >=
/// min_duration_ms` with dispersion at or below `max_stddev_counts`, then
/// return the rounded mean. Hitting `max_samples` returns the mean of
/// everything collected — a less stable answer, never a failure.
pub fn read_stable_raw(
    cell: &mut dyn LoadCell,
    clock: &dyn Clock,
    cfg: StableRead,
) -> Result<i32, DeviceError> {
    let min_samples = (cfg.min_samples.max(1) as usize).min(STABLE_BUF_CAP);
    let max_samples = (cfg.max_samples as usize).clamp(min_samples, STABLE_BUF_CAP);
    let timeout = Duration::from_millis(cfg.read_timeout_ms);

    let mut buf: Vec<i64> = Vec::with_capacity(max_samples);
    let start = clock.now();
    while buf.len() < max_samples {
        let raw = cell
            .read(timeout)
            .map_err(|e| DeviceError::Sensor(e.to_string()))?;
        buf.push(i64::from(raw));
        trace!(raw, n = buf.len(), "stable-read sample");

        let elapsed = clock.ms_since(start);
        if buf.len() >= min_samples && elapsed >= cfg.min_duration_ms {
            let m = mean(&buf);
            let sd = stddev(&buf, m);
            if sd <= cfg.max_stddev_counts {
                debug!(mean = m, stddev = sd, n = buf.len(), "stable read settled");
                return Ok(round_i32(m));
            }
        }
    }

    // Cap reached: average what we have anyway.
    let m = mean(&buf);
    debug!(mean = m, n = buf.len(), "stable read capped");
    Ok(round_i32(m))
}

fn mean(buf: &[i64]) -> f64 {
    buf.iter().sum::<i64>() as f64 / buf.len() as f64
}

fn stddev(buf: &[i64], mean: f64) -> f64 {
    let n = buf.len();
    if n < 2 {
        return 0.0;
    }
    let acc: f64 = buf
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum();
    (acc / (n - 1) as f64).sqrt()
}

fn round_i32(x: f64) -> i32 {
    x.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}
