//! The owning device value: load cell + capture machine + calibration +
//! transport, driven by a single cooperative loop.
//!
//! Everything the firmware kept as module statics lives here, so tests and
//! the CLI can run any number of independent scales.

use std::time::{Duration, Instant};

use autoscale_traits::{CalStore, Clock, LoadCell};
use tracing::{debug, error, info, warn};

use crate::calibration::Calibrator;
use crate::capture::{ActiveOutcome, CaptureMachine, Phase};
use crate::config::DeviceConfig;
use crate::console::{self, Command, HELP};
use crate::error::DeviceError;
use crate::transport::{quantize_for_wire, EventSink, WireEvent};

/// Per-read wait on the ADC during ACTIVE capture; generous for a 10 SPS
/// RATE strap.
const SENSOR_READ_TIMEOUT_MS: u64 = 500;
/// Heartbeat cadence while capture is suspended.
const HEARTBEAT_MS: u64 = 1_000;
/// Boot-time tare attempts before giving up (the ADC may need power cycles).
const BOOT_TARE_ATTEMPTS: u32 = 3;

/// What one cooperative iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Paused,
    Idle,
    Capturing,
    Uploaded { samples: usize },
    /// Upload failed; the event is gone by design.
    Dropped { samples: usize },
}

pub struct Scale<C: LoadCell, K: Clock> {
    cell: C,
    clock: K,
    epoch: Instant,
    cfg: DeviceConfig,
    scale_id: String,
    machine: CaptureMachine,
    calibrator: Calibrator,
    sink: Box<dyn EventSink>,
    paused: bool,
    last_heartbeat_ms: u64,
}

impl<C: LoadCell, K: Clock> Scale<C, K> {
    pub fn new(cell: C, clock: K, cfg: DeviceConfig, sink: Box<dyn EventSink>) -> Self {
        let epoch = clock.now();
        let machine = CaptureMachine::new(cfg.capture.clone());
        let calibrator = Calibrator::new(
            cfg.calibration.clone(),
            cfg.capture.invert_sign,
            cfg.capture.deadband_kg,
        );
        let scale_id = cfg.transport.scale_id.clone();
        Self {
            cell,
            clock,
            epoch,
            cfg,
            scale_id,
            machine,
            calibrator,
            sink,
            paused: false,
            last_heartbeat_ms: 0,
        }
    }

    /// Load the persisted calibration factor and tare the empty platform.
    /// Tare failures are logged, not fatal: the scale still captures, just
    /// against the stale zero.
    pub fn boot(&mut self, store: &dyn CalStore) {
        match self.calibrator.load_on_boot(store) {
            Ok(true) => {}
            Ok(false) => info!("no persisted factor; using default"),
            Err(e) => warn!(error = %e, "calibration store unreadable; using default"),
        }
        let reads = self.cfg.calibration.tare_reads;
        for attempt in 1..=BOOT_TARE_ATTEMPTS {
            match self.calibrator.tare(&mut self.cell, &self.clock, reads) {
                Ok(_) => return,
                Err(e) if attempt < BOOT_TARE_ATTEMPTS => {
                    warn!(error = %e, attempt, "boot tare failed; retrying")
                }
                Err(e) => error!(error = %e, "boot tare failed; continuing untared"),
            }
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &CaptureMachine {
        &self.machine
    }

    pub fn counts_per_gram(&self) -> f32 {
        self.calibrator.conversion.counts_per_gram
    }

    /// Suspend capture (calibration in progress, operator request).
    pub fn pause_capture(&mut self) {
        self.paused = true;
    }

    /// Resume capture behind a fresh cooldown so residual motion from the
    /// pause cannot trigger a session.
    pub fn resume_capture(&mut self) {
        self.paused = false;
        let now = self.now_ms();
        self.machine
            .begin_cooldown(now, self.cfg.calibration.cooldown_ms);
    }

    /// One cooperative loop iteration: an IDLE poll at the configured
    /// cadence, or one ACTIVE read as fast as the ADC delivers.
    pub fn tick(&mut self) -> Tick {
        if self.paused {
            let now = self.now_ms();
            if now.saturating_sub(self.last_heartbeat_ms) >= HEARTBEAT_MS {
                info!(now_ms = now, "capture paused; heartbeat");
                self.last_heartbeat_ms = now;
            }
            self.clock
                .sleep(Duration::from_millis(self.cfg.capture.idle_poll_ms));
            return Tick::Paused;
        }

        match self.machine.phase() {
            Phase::Idle => {
                match self.read_kg_burst(self.cfg.capture.idle_burst) {
                    Ok(kg) => {
                        let now = self.now_ms();
                        debug!(kg, now_ms = now, "idle poll");
                        self.machine.on_idle_sample(kg, now);
                    }
                    Err(e) => warn!(error = %e, "idle read failed"),
                }
                self.clock
                    .sleep(Duration::from_millis(self.cfg.capture.idle_poll_ms));
                match self.machine.phase() {
                    Phase::Active => Tick::Capturing,
                    Phase::Idle => Tick::Idle,
                }
            }
            Phase::Active => {
                let raw = match self
                    .cell
                    .read(Duration::from_millis(SENSOR_READ_TIMEOUT_MS))
                {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "active read failed; sample skipped");
                        return Tick::Capturing;
                    }
                };
                let kg = self.calibrator.conversion.to_kg(raw);
                let now = self.now_ms();
                match self.machine.on_active_sample(kg, now) {
                    ActiveOutcome::Sampling => Tick::Capturing,
                    ActiveOutcome::Finished(samples) => self.submit(samples, now),
                }
            }
        }
    }

    /// Serialize and hand the finished session to the sink. The buffer is
    /// gone either way; upload failure loses the event by design.
    fn submit(&mut self, mut samples: Vec<autoscale_core::Sample>, now_ms: u64) -> Tick {
        let n = samples.len();
        quantize_for_wire(&mut samples);
        let event = WireEvent {
            scale_id: &self.scale_id,
            // device uptime, not wall clock; advisory only
            t0_epoch_ms: Some(now_ms),
            samples: &samples,
        };
        match self.sink.submit(&event) {
            Ok(()) => {
                info!(samples = n, "event uploaded");
                Tick::Uploaded { samples: n }
            }
            Err(e) => {
                warn!(error = %e, samples = n, "upload failed; event lost");
                Tick::Dropped { samples: n }
            }
        }
    }

    /// Handle one serial console line; returns the printable outcome.
    /// Every calibration operation, successful or not, is followed by a
    /// capture cooldown.
    pub fn handle_line(&mut self, line: &str, store: &mut dyn CalStore) -> String {
        let cmd = match console::parse(line) {
            Ok(cmd) => cmd,
            Err(msg) => return msg,
        };
        match cmd {
            Command::Help => return HELP.to_string(),
            Command::CalUsage => return "usage: cal <grams> (e.g., cal 500)".to_string(),
            _ => {}
        }

        let outcome = self.run_cal_command(cmd, store);
        let now = self.now_ms();
        self.machine
            .begin_cooldown(now, self.cfg.calibration.cooldown_ms);
        match outcome {
            Ok(msg) => msg,
            Err(e) => format!("error: {e}"),
        }
    }

    fn run_cal_command(
        &mut self,
        cmd: Command,
        store: &mut dyn CalStore,
    ) -> Result<String, DeviceError> {
        match cmd {
            Command::Tare => {
                let reads = self.cfg.calibration.tare_reads;
                let zero = self.calibrator.tare(&mut self.cell, &self.clock, reads)?;
                Ok(format!("tare done (zero = {zero} counts)"))
            }
            Command::Cal(mass_g) => {
                let out = self.calibrator.calibrate_single(
                    &mut self.cell,
                    &self.clock,
                    store,
                    mass_g,
                )?;
                Ok(format!(
                    "new factor {:.6} counts/gram; measuring {:.3} kg now",
                    out.counts_per_gram, out.check_kg
                ))
            }
            Command::Cal1(mass_g) => {
                let raw = self
                    .calibrator
                    .record_point1(&mut self.cell, &self.clock, mass_g)?;
                Ok(format!("point 1: raw {raw} @ {mass_g:.2} g"))
            }
            Command::Cal2(mass_g) => {
                let raw = self
                    .calibrator
                    .record_point2(&mut self.cell, &self.clock, mass_g)?;
                Ok(format!("point 2: raw {raw} @ {mass_g:.2} g"))
            }
            Command::Solve => {
                let factor = self.calibrator.solve_two_point(store)?;
                let check = self.calibrator.live_check(&mut self.cell, &self.clock)?;
                Ok(format!(
                    "factor = {factor:.6} counts/gram; measuring {check:.3} kg now"
                ))
            }
            Command::ResetCal => {
                self.calibrator.reset(store)?;
                Ok(format!(
                    "calibration reset; default {:.6} counts/gram",
                    self.calibrator.conversion.counts_per_gram
                ))
            }
            Command::Help | Command::CalUsage => unreachable!("handled above"),
        }
    }

    fn read_kg_burst(&mut self, n: u32) -> Result<f64, DeviceError> {
        let timeout = Duration::from_millis(SENSOR_READ_TIMEOUT_MS);
        let mut sum: i64 = 0;
        let mut got: u32 = 0;
        for _ in 0..n.max(1) {
            match self.cell.read(timeout) {
                Ok(raw) => {
                    sum += i64::from(raw);
                    got += 1;
                }
                Err(e) => warn!(error = %e, "burst read skipped"),
            }
        }
        if got == 0 {
            return Err(DeviceError::Sensor("no readings in burst".to_string()));
        }
        let avg = (sum as f64 / f64::from(got)).round() as i32;
        Ok(self.calibrator.conversion.to_kg(avg))
    }
}
