use autoscale_core::{detect, refine, Sample};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Worst-case-sized event: a full 80 Hz capture near the device buffer cap.
fn big_trace() -> Vec<Sample> {
    let n = 6_000usize;
    (0..n)
        .map(|i| {
            let t = i as u64 * 12; // ~80 SPS
            let t_s = t as f64 / 1000.0;
            let kg = if t_s < 2.0 {
                4.0 * t_s
            } else {
                let phase = i as f64 * 2.0 * std::f64::consts::PI / 160.0;
                8.0 + 0.006 * phase.sin()
            };
            Sample::new(t, kg)
        })
        .collect()
}

fn bench_detector(c: &mut Criterion) {
    let samples = big_trace();
    c.bench_function("detect_6k_samples", |b| {
        b.iter(|| detect(black_box(&samples)).unwrap())
    });

    let raw = detect(&samples).unwrap();
    let history = [8.0, 8.1, 7.9, 8.05, 7.95];
    c.bench_function("refine_6k_samples", |b| {
        b.iter(|| refine(black_box(&samples), black_box(&raw), &history, 1.0))
    });
}

criterion_group!(benches, bench_detector);
criterion_main!(benches);
