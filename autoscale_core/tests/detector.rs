use autoscale_core::{detect, Sample, MODE_FALLBACK, MODE_PLATEAU};

/// Deterministic low-amplitude disturbance standing in for sensor noise.
/// Slow enough that a real plateau stays a plateau at 10 Hz.
fn wobble(i: usize, amplitude: f64) -> f64 {
    let phase = i as f64 * 2.0 * std::f64::consts::PI / 100.0;
    amplitude * phase.sin()
}

/// 10 Hz trace: one empty-platform reading, then a loaded plateau.
fn flat_plateau() -> Vec<Sample> {
    let mut samples = vec![Sample::new(0, 0.0)];
    for i in 1..=50 {
        let t = i as u64 * 100;
        samples.push(Sample::new(t, 5.00 + wobble(i, 0.005)));
    }
    samples
}

#[test]
fn flat_plateau_detects_with_high_quality() {
    let d = detect(&flat_plateau()).unwrap();
    assert_eq!(d.mode, MODE_PLATEAU);
    assert!(
        (d.weight_kg - 5.00).abs() < 0.02,
        "weight {} not within 20 g of 5 kg",
        d.weight_kg
    );
    assert!(d.quality > 0.8, "quality {} too low", d.quality);
    assert!(d.uncertainty_kg < 0.01);
}

#[test]
fn ramp_then_plateau_window_lands_on_the_plateau() {
    // 0 -> 8 kg over 2 s, hold 8.00 for 6 s, then 2 s of release noise.
    let mut samples = Vec::new();
    for i in 0..=100 {
        let t = i as u64 * 100;
        let t_s = i as f64 * 0.1;
        let kg = if t_s < 2.0 {
            4.0 * t_s
        } else if t_s < 8.0 {
            8.00 + wobble(i, 0.003)
        } else {
            // platform released; light rattling near zero
            0.3 * (1.0 - (t_s - 8.0) / 2.0) * (1.0 + wobble(i, 0.5))
        };
        samples.push(Sample::new(t, kg));
    }

    let d = detect(&samples).unwrap();
    assert_eq!(d.mode, MODE_PLATEAU);
    assert!(
        d.start_s >= 2.0 && d.end_s <= 8.0,
        "window [{}, {}] escapes the plateau",
        d.start_s,
        d.end_s
    );
    assert!((d.weight_kg - 8.00).abs() < 0.02);
    assert!(d.duration_s >= 3.0);
}

#[test]
fn too_short_plateau_falls_back_to_tail_median() {
    // 18 s of slow drift, then a 2 s hold: below the 3 s plateau minimum.
    let mut samples = Vec::new();
    for i in 0..=200 {
        let t = i as u64 * 100;
        let t_s = i as f64 * 0.1;
        let kg = if t_s < 18.0 { t_s / 3.0 } else { 6.0 };
        samples.push(Sample::new(t, kg));
    }

    let d = detect(&samples).unwrap();
    assert_eq!(d.mode, MODE_FALLBACK);

    // Expected: median over the last max(12, 0.25 * 20) = 12 seconds.
    let tail_start_ms = 20_000 - 12_000;
    let mut tail: Vec<f64> = samples
        .iter()
        .filter(|s| s.t_ms >= tail_start_ms)
        .map(|s| s.kg)
        .collect();
    tail.sort_by(|a, b| a.total_cmp(b));
    let mid = tail.len() / 2;
    let expected = if tail.len() % 2 == 0 {
        (tail[mid - 1] + tail[mid]) / 2.0
    } else {
        tail[mid]
    };
    assert!(
        (d.weight_kg - expected).abs() < 1e-9,
        "weight {} != tail median {}",
        d.weight_kg,
        expected
    );
    assert!((d.start_s - 8.0).abs() < 1e-9);
}

#[test]
fn all_near_zero_takes_the_fallback_path() {
    // Deadband zeros dominate; fewer than 10 readings clear the floor.
    let mut samples = Vec::new();
    for i in 0..45 {
        samples.push(Sample::new(i * 100, 0.0));
    }
    for i in 45..50 {
        samples.push(Sample::new(i * 100, 0.015));
    }

    let d = detect(&samples).unwrap();
    assert_eq!(d.mode, MODE_FALLBACK);
    assert_eq!(d.quality, 0.65);
}

#[test]
fn window_bounds_stay_inside_the_trace() {
    let samples = flat_plateau();
    let d = detect(&samples).unwrap();
    let t_last_s = samples.last().unwrap().t_ms as f64 / 1000.0;
    assert!(d.start_s >= 0.0);
    assert!(d.end_s <= t_last_s + 1e-9);
    assert!(d.start_s <= d.end_s);
}

#[test]
fn weight_lies_between_window_extremes() {
    let samples = flat_plateau();
    let d = detect(&samples).unwrap();
    let lo = samples.iter().map(|s| s.kg).fold(f64::MAX, f64::min);
    let hi = samples.iter().map(|s| s.kg).fold(f64::MIN, f64::max);
    assert!(d.weight_kg >= lo && d.weight_kg <= hi);
}

#[test]
fn detection_is_deterministic() {
    let samples = flat_plateau();
    let a = detect(&samples).unwrap();
    let b = detect(&samples).unwrap();
    assert_eq!(a.weight_kg, b.weight_kg);
    assert_eq!(a.uncertainty_kg, b.uncertainty_kg);
    assert_eq!(a.start_s, b.start_s);
    assert_eq!(a.end_s, b.end_s);
}

#[test]
fn unsorted_input_is_sorted_before_detection() {
    let mut samples = flat_plateau();
    samples.reverse();
    let sorted = detect(&flat_plateau()).unwrap();
    let reversed = detect(&samples).unwrap();
    assert_eq!(sorted.weight_kg, reversed.weight_kg);
    assert_eq!(sorted.mode, reversed.mode);
}
