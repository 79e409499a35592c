use autoscale_core::{detect, refine, Sample, MODE_FALLBACK, MODE_PLATEAU};
use proptest::prelude::*;

/// Build a plausible weighing trace: optional lead-in ramp, a long plateau
/// with a slow deterministic wobble, optional release tail. 10 Hz.
fn trace(level_kg: f64, ramp_n: usize, plateau_n: usize, wobble_amp: f64) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(ramp_n + plateau_n);
    let mut t = 0u64;
    for i in 0..ramp_n {
        let frac = (i + 1) as f64 / ramp_n as f64;
        samples.push(Sample::new(t, level_kg * frac));
        t += 100;
    }
    for i in 0..plateau_n {
        let phase = i as f64 * 2.0 * std::f64::consts::PI / 100.0;
        samples.push(Sample::new(t, level_kg + wobble_amp * phase.sin()));
        t += 100;
    }
    samples
}

proptest! {
    #[test]
    fn quality_stays_in_unit_range(
        level in 1.0f64..50.0,
        ramp_n in 0usize..30,
        plateau_n in 50usize..250,
        amp in 0.0f64..0.01,
    ) {
        let samples = trace(level, ramp_n, plateau_n, amp);
        let d = detect(&samples).unwrap();
        prop_assert!((0.0..=1.0).contains(&d.quality), "quality {}", d.quality);
    }

    #[test]
    fn plateau_window_lies_inside_the_trace(
        level in 1.0f64..50.0,
        ramp_n in 0usize..30,
        plateau_n in 60usize..250,
    ) {
        let samples = trace(level, ramp_n, plateau_n, 0.004);
        let d = detect(&samples).unwrap();
        if d.mode == MODE_PLATEAU {
            let t_last = samples.last().unwrap().t_ms as f64 / 1000.0;
            prop_assert!(d.start_s >= 0.0);
            prop_assert!(d.end_s <= t_last + 1e-9);
            prop_assert!(d.duration_s >= 3.0 - 1e-9);
        }
    }

    #[test]
    fn weight_bounded_by_observed_extremes(
        level in 1.0f64..50.0,
        ramp_n in 0usize..30,
        plateau_n in 50usize..250,
        amp in 0.0f64..0.01,
    ) {
        let samples = trace(level, ramp_n, plateau_n, amp);
        let d = detect(&samples).unwrap();
        let lo = samples.iter().map(|s| s.kg).fold(f64::MAX, f64::min);
        let hi = samples.iter().map(|s| s.kg).fold(f64::MIN, f64::max);
        prop_assert!(d.weight_kg >= lo - 1e-9 && d.weight_kg <= hi + 1e-9);
    }

    #[test]
    fn detection_replays_identically(
        level in 1.0f64..50.0,
        plateau_n in 50usize..200,
    ) {
        let samples = trace(level, 10, plateau_n, 0.004);
        let a = detect(&samples).unwrap();
        let b = detect(&samples).unwrap();
        prop_assert_eq!(a.weight_kg, b.weight_kg);
        prop_assert_eq!(a.uncertainty_kg, b.uncertainty_kg);
        prop_assert_eq!(a.mode, b.mode);
    }

    #[test]
    fn sparse_positive_traces_fall_back(extra in 1usize..9) {
        // Mostly deadband zeros: fewer than 10 survivors by construction.
        let mut samples: Vec<Sample> = (0..60u64).map(|i| Sample::new(i * 100, 0.0)).collect();
        for i in 0..extra {
            samples.push(Sample::new(6_000 + i as u64 * 100, 0.02));
        }
        let d = detect(&samples).unwrap();
        prop_assert_eq!(d.mode.as_str(), MODE_FALLBACK);
        prop_assert_eq!(d.quality, 0.65);
    }

    #[test]
    fn refiner_never_strays_from_the_band(
        level in 2.0f64..30.0,
        plateau_n in 130usize..250,
        offset in -0.5f64..0.5,
    ) {
        let samples = trace(level, 10, plateau_n, 0.004);
        let raw = detect(&samples).unwrap();
        let history = [level + offset, level - offset, level + 0.1];
        let out = refine(&samples, &raw, &history, 1.0);
        if let Some(refined) = out.refined {
            prop_assert!((refined.weight_kg - out.consensus_kg).abs() <= 1.0 + 1e-9);
            prop_assert!(refined.start_s <= refined.end_s);
            prop_assert!(refined.uncertainty_kg >= 0.0);
        }
    }
}
