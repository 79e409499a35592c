//! Consensus refinement: reconcile a fresh detection with the device's
//! recent history.
//!
//! The refiner is a pure function of `(samples, raw detection, recent raw
//! weights, band)`; the worker composes it with the detector and the
//! history query. It never replaces the raw detection — when no window
//! near the consensus exists, the raw result stands untouched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detector::Detection;
use crate::filters::{estimate_hz, median, percentile, sample_stddev};
use crate::types::{sorted_seconds, Sample};

pub const MODE_CONSENSUS: &str = "consensus";

const EPS: f64 = 1e-9;
/// The refined tail never starts more than this many seconds before the end.
const TAIL_SPAN_S: f64 = 12.0;

/// A consensus-band window that beat the raw detection's placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refined {
    pub weight_kg: f64,
    pub uncertainty_kg: f64,
    pub mode: String,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    pub band_kg: f64,
}

/// Refiner output: the consensus scalar and source count are always
/// reported, the refined window only when one qualified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub consensus_kg: f64,
    /// Number of weights the consensus median was taken over.
    pub sources: usize,
    pub refined: Option<Refined>,
}

/// Search for a tighter window within `band_kg` of the historical consensus.
///
/// `recent_raw_kg` holds the most recent raw detector weights for the same
/// device, newest first, at most ten entries by the worker's contract.
pub fn refine(
    samples: &[Sample],
    raw: &Detection,
    recent_raw_kg: &[f64],
    band_kg: f64,
) -> ConsensusOutcome {
    let mut weights = Vec::with_capacity(1 + recent_raw_kg.len());
    weights.push(raw.weight_kg);
    weights.extend_from_slice(recent_raw_kg);
    let consensus_kg = median(&weights);
    let sources = weights.len();

    let (kept_t, kept_kg) = positive_floor(samples);
    if kept_kg.len() < 2 {
        return ConsensusOutcome {
            consensus_kg,
            sources,
            refined: None,
        };
    }

    let hz = estimate_hz(&kept_t);
    let win = ((3.0 * hz).round() as usize).max(5);
    let n = kept_kg.len();
    if n < win {
        return ConsensusOutcome {
            consensus_kg,
            sources,
            refined: None,
        };
    }

    let t0 = kept_t[0];
    let t_last = kept_t[n - 1];
    let duration = t_last - t0;
    let tail_start = (t_last - TAIL_SPAN_S).max(t0 + 0.75 * duration).max(t0);

    let refined = best_window(&kept_t, &kept_kg, win, consensus_kg, band_kg, Some(tail_start))
        .or_else(|| best_window(&kept_t, &kept_kg, win, consensus_kg, band_kg, None))
        .map(|(i, m, sigma)| Refined {
            weight_kg: m,
            uncertainty_kg: sigma / (win as f64).sqrt(),
            mode: MODE_CONSENSUS.to_string(),
            start_s: kept_t[i],
            end_s: kept_t[i + win - 1],
            duration_s: kept_t[i + win - 1] - kept_t[i],
            band_kg,
        });

    if refined.is_none() {
        debug!(
            consensus_kg,
            band_kg, "no window inside band; raw detection stands"
        );
    }
    ConsensusOutcome {
        consensus_kg,
        sources,
        refined,
    }
}

/// The detector's positive-floor preprocessing, re-run standalone: keep
/// samples at or above `max(0.5 * median(positive kg), 5th percentile)`.
fn positive_floor(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    if samples.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let (ts, kgs) = sorted_seconds(samples);
    let positives: Vec<f64> = kgs.iter().copied().filter(|k| *k > 0.0).collect();
    if positives.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let low_cut = (0.5 * median(&positives)).max(percentile(&kgs, 5.0));
    let mut kept_t = Vec::with_capacity(ts.len());
    let mut kept_kg = Vec::with_capacity(ts.len());
    for (t, k) in ts.iter().zip(kgs.iter()) {
        if *k >= low_cut {
            kept_t.push(*t);
            kept_kg.push(*k);
        }
    }
    (kept_t, kept_kg)
}

/// Best in-band window of `win` samples, optionally restricted to windows
/// starting at or after `from_t`. Returns `(start index, median, stddev)`.
fn best_window(
    ts: &[f64],
    kgs: &[f64],
    win: usize,
    consensus_kg: f64,
    band_kg: f64,
    from_t: Option<f64>,
) -> Option<(usize, f64, f64)> {
    let n = kgs.len();
    let t0 = ts[0];
    let t_last = ts[n - 1];
    let mut best: Option<(usize, f64, f64, f64)> = None;

    for i in 0..=(n - win) {
        if let Some(from) = from_t {
            if ts[i] < from {
                continue;
            }
        }
        let window = &kgs[i..i + win];
        let m = median(window);
        let dist = (m - consensus_kg).abs();
        if dist > band_kg {
            continue;
        }
        let sigma = sample_stddev(window);
        let t_mid = (ts[i] + ts[i + win - 1]) / 2.0;
        let late = 0.5 + 0.5 * (t_mid - t0) / (t_last - t0).max(EPS);
        let score = ((band_kg - dist) / band_kg) * (1.0 / (sigma + EPS)) * late;
        match best {
            Some((_, _, _, s)) if s >= score => {}
            _ => best = Some((i, m, sigma, score)),
        }
    }
    best.map(|(i, m, sigma, _)| (i, m, sigma))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MODE_PLATEAU;

    fn detection(weight_kg: f64) -> Detection {
        Detection {
            weight_kg,
            uncertainty_kg: 0.01,
            quality: 0.9,
            mode: MODE_PLATEAU.to_string(),
            start_s: 1.0,
            end_s: 5.0,
            duration_s: 4.0,
            mean_abs_slope: 0.001,
            mean_std: 0.01,
            n_points: 40,
        }
    }

    #[test]
    fn consensus_is_median_of_raw_and_history() {
        let samples = vec![Sample::new(0, 5.0)];
        let out = refine(&samples, &detection(7.9), &[10.1, 10.0, 10.2, 9.9, 10.0], 1.0);
        assert_eq!(out.sources, 6);
        assert!((out.consensus_kg - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_history_keeps_raw_weight_as_consensus() {
        let samples = vec![Sample::new(0, 5.0)];
        let out = refine(&samples, &detection(5.0), &[], 1.0);
        assert_eq!(out.sources, 1);
        assert_eq!(out.consensus_kg, 5.0);
        assert!(out.refined.is_none());
    }
}
