//! Bit-banged HX711 load-cell ADC driver.
//!
//! The converter signals data-ready by dropping DT low; 24 data bits are
//! then clocked out MSB-first on SCK, followed by 1..3 extra pulses that
//! select gain and channel for the *next* conversion. Output rate is fixed
//! by the RATE pin strap (10 or 80 SPS), so the driver paces itself on the
//! DT line rather than on a timer.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::{HwError, Result};

/// Extra clock pulses after the 24-bit read: channel A, gain 128.
pub const PULSES_A128: u8 = 1;
/// Channel B, gain 32.
pub const PULSES_B32: u8 = 2;
/// Channel A, gain 64.
pub const PULSES_A64: u8 = 3;

pub struct Hx711 {
    dt: rppal::gpio::InputPin,
    sck: rppal::gpio::OutputPin,
    extra_pulses: u8,
}

impl Hx711 {
    /// Takes ownership of the DT (input) and SCK (output) pins.
    /// `extra_pulses` is one of the `PULSES_*` constants.
    pub fn new(
        dt_pin: rppal::gpio::InputPin,
        mut sck_pin: rppal::gpio::OutputPin,
        extra_pulses: u8,
    ) -> Result<Self> {
        // SCK must idle low; >60 us high puts the chip into power-down.
        sck_pin.set_low();
        Ok(Self {
            dt: dt_pin,
            sck: sck_pin,
            extra_pulses,
        })
    }

    /// True when a conversion is waiting to be clocked out.
    pub fn is_ready(&self) -> bool {
        self.dt.is_low()
    }

    /// Wait for data-ready, then clock out one signed 24-bit conversion.
    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<i32> {
        let deadline = Instant::now() + timeout;
        while self.dt.is_high() {
            if Instant::now() >= deadline {
                return Err(HwError::DataReadyTimeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        let mut value: i32 = 0;
        for _ in 0..24 {
            self.sck.set_high();
            edge_settle();
            value = (value << 1) | i32::from(self.dt.is_high());
            self.sck.set_low();
            edge_settle();
        }

        // Select gain/channel for the next conversion.
        for _ in 0..self.extra_pulses {
            self.sck.set_high();
            edge_settle();
            self.sck.set_low();
            edge_settle();
        }

        let value = sign_extend_24(value);
        trace!(raw = value, "hx711 conversion");
        Ok(value)
    }
}

/// Extend bit 23 into the upper byte.
#[inline]
fn sign_extend_24(v: i32) -> i32 {
    if v & 0x80_0000 != 0 {
        v | !0xFF_FFFF
    } else {
        v
    }
}

/// Brief pause so SCK edges meet the part's 0.2 us minimum high/low time.
#[inline(always)]
fn edge_settle() {
    std::hint::spin_loop();
}
