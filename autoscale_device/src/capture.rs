//! Event-capture state machine: IDLE ↔ ACTIVE with hysteresis, rising-edge
//! arming, and post-event cooldown.
//!
//! The machine is pure over `(converted kg, now_ms)` inputs; the owning
//! `Scale` feeds it readings and wall time, so tests can replay exact
//! traces against a manual clock.

use autoscale_core::Sample;
use tracing::{debug, info};

use crate::config::CaptureCfg;

/// EMA smoothing on the newest IDLE reading.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
}

/// What an IDLE poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// Nothing to do; stay in IDLE.
    Quiet,
    /// Trigger fired; the machine is now ACTIVE and the buffer is armed.
    Triggered,
}

/// What an ACTIVE sample did.
#[derive(Debug)]
pub enum ActiveOutcome {
    Sampling,
    /// The session ended (hysteresis or hard cap); here is its buffer.
    Finished(Vec<Sample>),
}

#[derive(Debug)]
pub struct CaptureMachine {
    cfg: CaptureCfg,
    phase: Phase,
    ema: Option<f64>,
    armed: bool,
    in_band_since: Option<u64>,
    cooldown_until_ms: u64,
    session_t0_ms: u64,
    below_since: Option<u64>,
    buf: Vec<Sample>,
}

impl CaptureMachine {
    pub fn new(cfg: CaptureCfg) -> Self {
        let cap = cfg.max_samples;
        Self {
            cfg,
            phase: Phase::Idle,
            ema: None,
            armed: false,
            in_band_since: None,
            cooldown_until_ms: 0,
            session_t0_ms: 0,
            below_since: None,
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Smoothed idle-weight estimate, if any polls have happened.
    pub fn ema_kg(&self) -> Option<f64> {
        self.ema
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        now_ms < self.cooldown_until_ms
    }

    /// Suppress triggering and drop any earned arm state until `now_ms +
    /// cooldown_ms`. Called after every event and after calibration, so
    /// residual platform motion cannot start a spurious session.
    pub fn begin_cooldown(&mut self, now_ms: u64, cooldown_ms: u64) {
        self.cooldown_until_ms = now_ms.saturating_add(cooldown_ms);
        self.armed = false;
        self.in_band_since = None;
        debug!(until_ms = self.cooldown_until_ms, "capture cooldown");
    }

    /// One IDLE poll with a converted reading.
    ///
    /// Updates the EMA, accrues the arm gate while |EMA| sits inside the arm
    /// band, and fires the trigger when the machine is armed, the EMA rose
    /// by at least `rise_min_kg` this poll, and |EMA| reached `trigger_kg`.
    pub fn on_idle_sample(&mut self, kg: f64, now_ms: u64) -> IdleOutcome {
        debug_assert_eq!(self.phase, Phase::Idle);
        let prev = self.ema;
        let ema = match prev {
            None => kg,
            Some(p) => EMA_ALPHA * kg + (1.0 - EMA_ALPHA) * p,
        };
        self.ema = Some(ema);
        let rise = ema - prev.unwrap_or(ema);

        if self.in_cooldown(now_ms) {
            // stability must be re-earned strictly after the cooldown
            self.in_band_since = None;
            return IdleOutcome::Quiet;
        }

        if ema.abs() <= self.cfg.arm_band_kg {
            match self.in_band_since {
                None => self.in_band_since = Some(now_ms),
                Some(since) => {
                    if now_ms.saturating_sub(since) >= self.cfg.arm_stable_ms && !self.armed {
                        self.armed = true;
                        debug!(ema_kg = ema, "trigger armed");
                    }
                }
            }
        } else {
            // leaving the band keeps the earned arm until it is consumed
            self.in_band_since = None;
        }

        if self.armed && rise >= self.cfg.rise_min_kg && ema.abs() >= self.cfg.trigger_kg {
            self.buf.clear();
            self.session_t0_ms = now_ms;
            self.below_since = None;
            self.armed = false;
            self.in_band_since = None;
            self.phase = Phase::Active;
            info!(ema_kg = ema, rise_kg = rise, "capture session started");
            return IdleOutcome::Triggered;
        }
        IdleOutcome::Quiet
    }

    /// One ACTIVE reading. The sample is appended (until the cap) and the
    /// session ends by hysteresis or by the hard duration cap.
    pub fn on_active_sample(&mut self, kg: f64, now_ms: u64) -> ActiveOutcome {
        debug_assert_eq!(self.phase, Phase::Active);
        let t_rel = now_ms.saturating_sub(self.session_t0_ms);
        if self.buf.len() < self.cfg.max_samples {
            self.buf.push(Sample::new(t_rel, kg));
        }

        if kg.abs() < self.cfg.release_kg {
            match self.below_since {
                None => self.below_since = Some(now_ms),
                Some(since) => {
                    if now_ms.saturating_sub(since) >= self.cfg.below_hold_ms {
                        info!(samples = self.buf.len(), "session ended (hysteresis)");
                        return self.finish(now_ms);
                    }
                }
            }
        } else {
            self.below_since = None;
        }

        if t_rel >= self.cfg.active_max_ms {
            info!(samples = self.buf.len(), "session ended (hard cap)");
            return self.finish(now_ms);
        }
        ActiveOutcome::Sampling
    }

    fn finish(&mut self, now_ms: u64) -> ActiveOutcome {
        self.phase = Phase::Idle;
        self.below_since = None;
        self.begin_cooldown(now_ms, self.cfg.post_active_cooldown_ms);
        let out = std::mem::take(&mut self.buf);
        self.buf.reserve(self.cfg.max_samples);
        ActiveOutcome::Finished(out)
    }
}
