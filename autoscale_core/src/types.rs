//! Sample and event-statistic types shared by the device and server crates.

use serde::{Deserialize, Serialize};

/// One time-stamped load-cell reading within an event.
///
/// `t` is milliseconds since the event's first sample; within one event the
/// timestamps are non-decreasing. `kg` is the converted weight. This struct
/// is also the wire shape (`{"t": ..., "kg": ...}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "t")]
    pub t_ms: u64,
    pub kg: f64,
}

impl Sample {
    pub fn new(t_ms: u64, kg: f64) -> Self {
        Self { t_ms, kg }
    }
}

/// Per-event statistics derived at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub sample_count: usize,
    pub peak_kg: f64,
}

impl EventStats {
    /// `peak_kg` is the maximum `kg` among the samples, 0 for an empty event.
    pub fn of(samples: &[Sample]) -> Self {
        let peak_kg = samples.iter().map(|s| s.kg).fold(f64::MIN, f64::max);
        Self {
            sample_count: samples.len(),
            peak_kg: if samples.is_empty() { 0.0 } else { peak_kg },
        }
    }
}

/// Samples sorted by timestamp, with times normalized to seconds relative to
/// the first sample. Both detector and refiner start from this view.
pub(crate) fn sorted_seconds(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    let mut ordered: Vec<&Sample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.t_ms);
    let t0 = ordered.first().map(|s| s.t_ms).unwrap_or(0);
    let ts = ordered
        .iter()
        .map(|s| (s.t_ms - t0) as f64 / 1000.0)
        .collect();
    let kgs = ordered.iter().map(|s| s.kg).collect();
    (ts, kgs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_is_max_kg() {
        let samples = vec![
            Sample::new(0, 1.0),
            Sample::new(100, 7.5),
            Sample::new(200, 3.2),
        ];
        let stats = EventStats::of(&samples);
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.peak_kg, 7.5);
    }

    #[test]
    fn empty_event_has_zero_peak() {
        let stats = EventStats::of(&[]);
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.peak_kg, 0.0);
    }

    #[test]
    fn wire_shape_uses_short_field_names() {
        let s = Sample::new(120, 4.25);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"t":120,"kg":4.25}"#);
    }

    #[test]
    fn sorted_seconds_normalizes_and_orders() {
        let samples = vec![
            Sample::new(1500, 2.0),
            Sample::new(500, 1.0),
            Sample::new(1000, 3.0),
        ];
        let (ts, kgs) = sorted_seconds(&samples);
        assert_eq!(ts, vec![0.0, 0.5, 1.0]);
        assert_eq!(kgs, vec![1.0, 3.0, 2.0]);
    }
}
