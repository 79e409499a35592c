//! Robust windowed statistics used by the detector and refiner.
//!
//! All helpers take slices and return owned vectors; the sample counts
//! involved (a few thousand per event) make allocation a non-issue here,
//! unlike the device control path.

/// Median of a non-empty slice. Even lengths average the two middle values.
pub fn median(xs: &[f64]) -> f64 {
    debug_assert!(!xs.is_empty(), "median of empty slice");
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    let mid = n / 2;
    if n % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Linear-interpolated percentile, `p` in 0..=100.
pub fn percentile(xs: &[f64], p: f64) -> f64 {
    debug_assert!(!xs.is_empty(), "percentile of empty slice");
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    if n == 1 {
        return v[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    v[lo] + (v[hi] - v[lo]) * frac
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (divisor n-1); 0 for fewer than two values.
pub fn sample_stddev(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Hampel outlier filter: replace a point with its window median when it
/// deviates from the median by more than `t0 * 1.4826 * MAD`.
///
/// `k` is the half-window; edges use the clipped window.
pub fn hampel(xs: &[f64], k: usize, t0: f64) -> Vec<f64> {
    let n = xs.len();
    let mut out = xs.to_vec();
    for i in 0..n {
        let lo = i.saturating_sub(k);
        let hi = (i + k + 1).min(n);
        let window = &xs[lo..hi];
        let med = median(window);
        let deviations: Vec<f64> = window.iter().map(|x| (x - med).abs()).collect();
        let sigma = 1.4826 * median(&deviations);
        if sigma > 0.0 && (xs[i] - med).abs() > t0 * sigma {
            out[i] = med;
        }
    }
    out
}

/// Centered moving average with a clipped window of width `win`.
pub fn moving_average(xs: &[f64], win: usize) -> Vec<f64> {
    let n = xs.len();
    let half = win.max(1) / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        out.push(mean(&xs[lo..hi]));
    }
    out
}

/// Central-difference derivative of `ys` with respect to `ts`; one-sided at
/// the ends. Zero where the time base does not advance.
pub fn central_derivative(ts: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = ys.len();
    debug_assert_eq!(ts.len(), n);
    let mut out = vec![0.0; n];
    if n < 2 {
        return out;
    }
    for i in 0..n {
        let (a, b) = if i == 0 {
            (0, 1)
        } else if i == n - 1 {
            (n - 2, n - 1)
        } else {
            (i - 1, i + 1)
        };
        let dt = ts[b] - ts[a];
        if dt > 0.0 {
            out[i] = (ys[b] - ys[a]) / dt;
        }
    }
    out
}

/// Centered rolling sample standard deviation with a clipped window.
pub fn rolling_std(xs: &[f64], win: usize) -> Vec<f64> {
    let n = xs.len();
    let half = win.max(1) / 2;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        out.push(sample_stddev(&xs[lo..hi]));
    }
    out
}

/// Sample rate estimated as the reciprocal of the median positive
/// inter-sample interval; 10 Hz when no interval advances (the HX711's
/// slow-strap rate).
pub fn estimate_hz(ts: &[f64]) -> f64 {
    let dts: Vec<f64> = ts
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| *dt > 0.0)
        .collect();
    if dts.is_empty() {
        return 10.0;
    }
    let dt = median(&dts);
    if dt > 0.0 {
        1.0 / dt
    } else {
        10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn percentile_interpolates() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&xs, 0.0), 0.0);
        assert_eq!(percentile(&xs, 100.0), 4.0);
        assert_eq!(percentile(&xs, 50.0), 2.0);
        assert!((percentile(&xs, 5.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn stddev_uses_n_minus_one() {
        assert_eq!(sample_stddev(&[1.0]), 0.0);
        let sd = sample_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138_089_935).abs() < 1e-6);
    }

    #[test]
    fn hampel_replaces_lone_spike() {
        let mut xs = vec![5.0; 31];
        xs[15] = 50.0;
        let out = hampel(&xs, 15, 4.0);
        assert_eq!(out[15], 5.0);
        assert_eq!(out[0], 5.0);
    }

    #[test]
    fn hampel_keeps_clean_trace() {
        let xs: Vec<f64> = (0..40).map(|i| 5.0 + 0.001 * (i as f64)).collect();
        let out = hampel(&xs, 15, 4.0);
        assert_eq!(out, xs);
    }

    #[test]
    fn derivative_of_ramp_is_slope() {
        let ts: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 2.0 * t).collect();
        let d = central_derivative(&ts, &ys);
        for v in d {
            assert!((v - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn hz_from_median_interval() {
        let ts = [0.0, 0.1, 0.2, 0.3, 0.4];
        assert!((estimate_hz(&ts) - 10.0).abs() < 1e-9);
        // duplicate timestamps are ignored
        let ts = [0.0, 0.0, 0.1, 0.2];
        assert!((estimate_hz(&ts) - 10.0).abs() < 1e-9);
    }
}
