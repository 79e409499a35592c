//! Plateau detector: locates the most plausible stable, late segment of a
//! weighing event and turns it into a weight estimate with uncertainty.
//!
//! The pipeline, in order: positive-floor filter, Hampel outlier rejection,
//! moving-average smoothing, central-difference derivative, rolling
//! dispersion, then gated region extraction and late-biased scoring. When
//! nothing qualifies, the tail-median fallback produces a usable (if less
//! trusted) estimate instead of failing the event.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::filters::{
    central_derivative, estimate_hz, hampel, mean, median, moving_average, percentile,
    rolling_std, sample_stddev,
};
use crate::types::{sorted_seconds, Sample};

pub const MODE_PLATEAU: &str = "plateau-v6";
pub const MODE_FALLBACK: &str = "fallback-tail-median";

/// Minimum survivors of the positive-floor filter before the plateau path
/// is attempted.
const MIN_KEPT: usize = 10;
/// A candidate region must span at least this long to count as a plateau.
const MIN_PLATEAU_S: f64 = 3.0;
/// Fallback quality: usable, but below any real plateau match.
const FALLBACK_QUALITY: f64 = 0.65;

const HAMPEL_HALF_WINDOW: usize = 15;
const HAMPEL_THRESHOLD: f64 = 4.0;
const EPS: f64 = 1e-9;

/// Detector output for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub weight_kg: f64,
    pub uncertainty_kg: f64,
    /// 0..=1; how cleanly the chosen window beat the gates.
    pub quality: f64,
    pub mode: String,
    /// Window bounds in seconds relative to the first sample.
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub mean_abs_slope: f64,
    pub mean_std: f64,
    pub n_points: usize,
}

struct Region {
    start: usize,
    /// exclusive
    end: usize,
    score: f64,
    mean_abs_slope: f64,
    mean_std: f64,
}

/// Run the detector over one event's samples.
///
/// Errors only on structurally unusable input (no samples, non-finite
/// values); a trace with no qualifying plateau still yields a fallback
/// detection.
pub fn detect(samples: &[Sample]) -> Result<Detection, CoreError> {
    if samples.is_empty() {
        return Err(CoreError::EmptyEvent);
    }
    if let Some(idx) = samples.iter().position(|s| !s.kg.is_finite()) {
        return Err(CoreError::NonFinite(idx));
    }

    let (ts, kgs) = sorted_seconds(samples);

    let positives: Vec<f64> = kgs.iter().copied().filter(|k| *k > 0.0).collect();
    if positives.is_empty() {
        debug!(n = kgs.len(), "no positive samples; tail-median fallback");
        return Ok(tail_median(&ts, &kgs));
    }
    let low_cut = (0.5 * median(&positives)).max(percentile(&kgs, 5.0));

    let mut kept_t = Vec::with_capacity(kgs.len());
    let mut kept_kg = Vec::with_capacity(kgs.len());
    for (t, k) in ts.iter().zip(kgs.iter()) {
        if *k >= low_cut {
            kept_t.push(*t);
            kept_kg.push(*k);
        }
    }
    if kept_kg.len() < MIN_KEPT {
        debug!(
            kept = kept_kg.len(),
            low_cut, "too few survivors; tail-median fallback"
        );
        return Ok(tail_median(&ts, &kgs));
    }

    let filtered = hampel(&kept_kg, HAMPEL_HALF_WINDOW, HAMPEL_THRESHOLD);
    let hz = estimate_hz(&kept_t);
    let smooth_win = ((0.6 * hz).round() as usize).max(3);
    let smoothed = moving_average(&filtered, smooth_win);
    let deriv = central_derivative(&kept_t, &smoothed);
    let std_win = ((3.0 * hz).round() as usize).max(5);
    let dispersion = rolling_std(&filtered, std_win);

    let abs_deriv: Vec<f64> = deriv.iter().map(|d| d.abs()).collect();
    let deriv_th = (0.6 * median(&abs_deriv)).clamp(0.01, 0.05);
    let pos_std: Vec<f64> = dispersion.iter().copied().filter(|s| *s > 0.0).collect();
    let std_th = if pos_std.is_empty() {
        0.06
    } else {
        (0.9 * median(&pos_std)).clamp(0.06, 0.20)
    };

    let stable: Vec<bool> = abs_deriv
        .iter()
        .zip(dispersion.iter())
        .map(|(d, s)| *d <= deriv_th && *s <= std_th)
        .collect();

    let best = stable_regions(&stable)
        .into_iter()
        .filter_map(|(a, b)| score_region(a, b, &kept_t, &abs_deriv, &dispersion, deriv_th, std_th))
        // strictly-greater keeps the earliest region on score ties
        .fold(None::<Region>, |best, r| match best {
            Some(b) if b.score >= r.score => Some(b),
            _ => Some(r),
        });

    let region = match best {
        Some(r) => r,
        None => {
            debug!(deriv_th, std_th, "no region spans 3 s; tail-median fallback");
            return Ok(tail_median(&ts, &kgs));
        }
    };

    let window = &filtered[region.start..region.end];
    let n = window.len();
    let weight_kg = median(window);
    let uncertainty_kg = sample_stddev(window) / (n as f64).sqrt();
    let quality = (0.5 * (1.0 - region.mean_abs_slope / deriv_th)
        + 0.5 * (1.0 - region.mean_std / std_th))
        .clamp(0.0, 1.0);
    let start_s = kept_t[region.start];
    let end_s = kept_t[region.end - 1];

    debug!(
        weight_kg,
        start_s,
        end_s,
        quality,
        n_points = n,
        "plateau selected"
    );
    Ok(Detection {
        weight_kg,
        uncertainty_kg,
        quality,
        mode: MODE_PLATEAU.to_string(),
        start_s,
        end_s,
        duration_s: end_s - start_s,
        mean_abs_slope: region.mean_abs_slope,
        mean_std: region.mean_std,
        n_points: n,
    })
}

/// Maximal contiguous runs of `true` as half-open `(start, end)` ranges.
fn stable_regions(mask: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, ok) in mask.iter().enumerate() {
        match (ok, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, mask.len()));
    }
    runs
}

fn score_region(
    a: usize,
    b: usize,
    ts: &[f64],
    abs_deriv: &[f64],
    dispersion: &[f64],
    deriv_th: f64,
    std_th: f64,
) -> Option<Region> {
    let duration = ts[b - 1] - ts[a];
    if duration < MIN_PLATEAU_S {
        return None;
    }
    let mean_abs_slope = mean(&abs_deriv[a..b]);
    let mean_std = mean(&dispersion[a..b]);
    let base =
        duration * (deriv_th / (mean_abs_slope + EPS)) * (std_th / (mean_std + EPS));
    let t_first = ts[0];
    let t_last = ts[ts.len() - 1];
    let t_mid = (ts[a] + ts[b - 1]) / 2.0;
    let late = 0.5 + 0.5 * (t_mid - t_first) / (t_last - t_first).max(EPS);
    Some(Region {
        start: a,
        end: b,
        score: base * late,
        mean_abs_slope,
        mean_std,
    })
}

/// Tail-median fallback over the sorted, normalized series: the median of
/// the last `max(12, 0.25 * duration)` seconds of samples.
fn tail_median(ts: &[f64], kgs: &[f64]) -> Detection {
    let t_first = ts[0];
    let t_last = ts[ts.len() - 1];
    let duration = t_last - t_first;
    let tail_start = (t_last - (0.25 * duration).max(12.0)).max(t_first);

    let tail: Vec<f64> = ts
        .iter()
        .zip(kgs.iter())
        .filter(|(t, _)| **t >= tail_start)
        .map(|(_, k)| *k)
        .collect();
    let n = tail.len();
    let weight_kg = median(&tail);
    let uncertainty_kg = sample_stddev(&tail) / (n as f64).sqrt();

    Detection {
        weight_kg,
        uncertainty_kg,
        quality: FALLBACK_QUALITY,
        mode: MODE_FALLBACK.to_string(),
        start_s: tail_start,
        end_s: t_last,
        duration_s: t_last - tail_start,
        mean_abs_slope: 0.0,
        mean_std: 0.0,
        n_points: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_event_is_an_error() {
        assert!(matches!(detect(&[]), Err(CoreError::EmptyEvent)));
    }

    #[test]
    fn non_finite_sample_is_an_error() {
        let samples = vec![Sample::new(0, 1.0), Sample::new(100, f64::NAN)];
        assert!(matches!(detect(&samples), Err(CoreError::NonFinite(1))));
    }

    #[test]
    fn stable_region_extraction() {
        let mask = [false, true, true, false, true, true, true];
        assert_eq!(stable_regions(&mask), vec![(1, 3), (4, 7)]);
        let all = [true, true];
        assert_eq!(stable_regions(&all), vec![(0, 2)]);
        let none = [false, false];
        assert!(stable_regions(&none).is_empty());
    }

    #[test]
    fn single_sample_falls_back() {
        let d = detect(&[Sample::new(0, 2.0)]).unwrap();
        assert_eq!(d.mode, MODE_FALLBACK);
        assert_eq!(d.weight_kg, 2.0);
        assert_eq!(d.n_points, 1);
        assert_eq!(d.quality, FALLBACK_QUALITY);
    }
}
