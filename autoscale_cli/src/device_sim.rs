//! Simulated device run: a scripted press-and-release driven through the
//! full capture loop on a manual clock, finishing in milliseconds of real
//! time. With `[transport] url` configured the event is uploaded; otherwise
//! the wire payload prints to stdout.

use std::error::Error;
use std::time::Duration;

use autoscale_device::{DeviceConfig, DeviceError, EventSink, Scale, Tick, WireEvent};
use autoscale_hardware::FileCalStore;
use autoscale_traits::{LoadCell, ManualClock};
use eyre::WrapErr;

/// Load cell whose conversions consume manual-clock time, standing in for
/// the real part's data-ready pacing.
struct PacedSim {
    script: Vec<i32>,
    idx: usize,
    clock: ManualClock,
    ms_per_read: u64,
}

impl LoadCell for PacedSim {
    fn read(&mut self, _timeout: Duration) -> Result<i32, Box<dyn Error + Send + Sync>> {
        self.clock.advance(Duration::from_millis(self.ms_per_read));
        let v = if self.idx < self.script.len() {
            let x = self.script[self.idx];
            self.idx += 1;
            x
        } else {
            self.script.last().copied().unwrap_or(0)
        };
        Ok(v)
    }
}

struct PrintSink;

impl EventSink for PrintSink {
    fn submit(&mut self, event: &WireEvent<'_>) -> Result<(), DeviceError> {
        let json =
            serde_json::to_string(event).map_err(|e| DeviceError::Upload(e.to_string()))?;
        println!("{json}");
        Ok(())
    }
}

/// Quiet boot, arm, a press at ~9 kg, release.
fn demo_script(counts_per_gram: f32) -> Vec<i32> {
    let raw_for = |kg: f64| (kg * 1000.0 * f64::from(counts_per_gram)).round() as i32;
    let mut script = Vec::new();
    script.extend(std::iter::repeat(0).take(20)); // boot tare
    script.extend(std::iter::repeat(0).take(60)); // quiet; arming
    script.extend(std::iter::repeat(raw_for(9.0)).take(160)); // the press
    script.push(0); // released; repeats
    script
}

pub fn run(cfg: DeviceConfig) -> eyre::Result<()> {
    let clock = ManualClock::new();
    let cell = PacedSim {
        script: demo_script(cfg.calibration.default_counts_per_gram),
        idx: 0,
        clock: clock.clone(),
        ms_per_read: 12,
    };

    let sink: Box<dyn EventSink> = match (&cfg.transport.url, &cfg.transport.secret) {
        (Some(url), Some(secret)) => Box::new(
            autoscale_device::transport::HttpSink::new(url.clone(), secret.clone())
                .wrap_err("build upload client")?,
        ),
        _ => Box::new(PrintSink),
    };

    let store_path = std::env::temp_dir().join(format!(
        "autoscale-sim-{}-nvs.toml",
        std::process::id()
    ));
    let store = FileCalStore::new(&store_path);

    let mut scale = Scale::new(cell, clock, cfg, sink);
    scale.boot(&store);

    let outcome = (|| {
        for _ in 0..10_000 {
            match scale.tick() {
                Tick::Uploaded { samples } => {
                    tracing::info!(samples, "simulated event delivered");
                    return Ok(());
                }
                Tick::Dropped { samples } => {
                    eyre::bail!("upload failed after capturing {samples} samples");
                }
                _ => {}
            }
        }
        eyre::bail!("simulation never produced an event")
    })();
    let _ = std::fs::remove_file(&store_path);
    outcome
}
