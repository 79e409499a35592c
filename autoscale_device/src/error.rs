use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DeviceError {
    #[error("load cell read failed: {0}")]
    Sensor(String),
    #[error("tare produced no readings within budget")]
    TareTimeout,
    #[error("platform never settled within {0} ms")]
    SettleTimeout(u64),
    #[error("calibration mass must be > 0")]
    InvalidMass,
    #[error("two-point solve needs cal1 and cal2 first")]
    MissingPoints,
    #[error("two-point masses must differ")]
    DegenerateMasses,
    #[error("calibration factor came out non-finite or zero")]
    DegenerateFactor,
    #[error("calibration store: {0}")]
    Store(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
