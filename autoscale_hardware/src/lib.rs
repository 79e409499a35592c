//! autoscale_hardware: load-cell and storage backends behind `autoscale_traits`.
//!
//! Features:
//! - `hardware`: HX711 over Raspberry Pi GPIO (`rppal`).
//! - (default) simulation backends that satisfy the same traits, so the rest
//!   of the stack builds and tests anywhere.

pub mod error;
pub mod nvs;

#[cfg(feature = "hardware")]
mod hx711;

pub use nvs::FileCalStore;

pub mod sim {
    use autoscale_traits::LoadCell;
    use std::error::Error;
    use std::time::Duration;

    /// Simulated load cell driven by a scripted sequence of raw counts.
    /// After the script runs out, the last value repeats (a settled platform).
    pub struct SimLoadCell {
        script: Vec<i32>,
        idx: usize,
    }

    impl SimLoadCell {
        pub fn new(script: impl Into<Vec<i32>>) -> Self {
            Self {
                script: script.into(),
                idx: 0,
            }
        }

        /// A cell that reads a constant raw count.
        pub fn level(raw: i32) -> Self {
            Self::new(vec![raw])
        }

        /// Extend the script (useful mid-test).
        pub fn push(&mut self, raw: i32) {
            self.script.push(raw);
        }
    }

    impl LoadCell for SimLoadCell {
        fn read(&mut self, _timeout: Duration) -> Result<i32, Box<dyn Error + Send + Sync>> {
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

    /// A cell that always times out; for exercising error paths.
    pub struct DeadLoadCell;

    impl LoadCell for DeadLoadCell {
        fn read(&mut self, _timeout: Duration) -> Result<i32, Box<dyn Error + Send + Sync>> {
            Err(Box::new(crate::error::HwError::DataReadyTimeout))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Duration;

        #[test]
        fn scripted_cell_repeats_its_last_value() {
            let mut cell = SimLoadCell::new(vec![10, 20]);
            let t = Duration::from_millis(1);
            assert_eq!(cell.read(t).unwrap(), 10);
            assert_eq!(cell.read(t).unwrap(), 20);
            assert_eq!(cell.read(t).unwrap(), 20);
            cell.push(30);
            assert_eq!(cell.read(t).unwrap(), 30);
        }

        #[test]
        fn dead_cell_times_out() {
            let err = DeadLoadCell.read(Duration::from_millis(1)).unwrap_err();
            assert!(err.to_string().contains("data-ready"));
        }
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    use crate::error::HwError;
    use crate::hx711::{Hx711, PULSES_A128};
    use autoscale_traits::LoadCell;
    use rppal::gpio::Gpio;
    use std::error::Error;
    use std::time::Duration;

    /// HX711-backed load cell on the given DT/SCK GPIO pins.
    pub struct GpioLoadCell {
        hx: Hx711,
    }

    impl GpioLoadCell {
        pub fn try_new(dt_pin: u8, sck_pin: u8) -> Result<Self, HwError> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
            let dt = gpio
                .get(dt_pin)
                .map_err(|e| HwError::Gpio(format!("claim DT pin {dt_pin}: {e}")))?
                .into_input();
            let sck = gpio
                .get(sck_pin)
                .map_err(|e| HwError::Gpio(format!("claim SCK pin {sck_pin}: {e}")))?
                .into_output_low();
            let hx = Hx711::new(dt, sck, PULSES_A128)?;
            Ok(Self { hx })
        }

        pub fn is_ready(&self) -> bool {
            self.hx.is_ready()
        }
    }

    impl LoadCell for GpioLoadCell {
        fn read(&mut self, timeout: Duration) -> Result<i32, Box<dyn Error + Send + Sync>> {
            self.hx
                .read_with_timeout(timeout)
                .map_err(|e| -> Box<dyn Error + Send + Sync> { Box::new(e) })
        }
    }
}

pub use sim::{DeadLoadCell, SimLoadCell};

#[cfg(feature = "hardware")]
pub use hardware::GpioLoadCell;
