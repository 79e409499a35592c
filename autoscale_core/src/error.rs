use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("event has no samples")]
    EmptyEvent,
    #[error("non-finite sample value at index {0}")]
    NonFinite(usize),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
