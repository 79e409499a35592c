//! Server side of AutoScale: durable ingest of weighing events, an
//! exactly-once-at-the-semantic-level job queue, and the worker that runs
//! detection and consensus refinement over each event.
//!
//! Handlers are request-per-invocation; concurrent workers stay safe
//! because job claiming is a conditional state flip (`store` module).

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod registry;
pub mod routes;
pub mod store;
pub mod worker;

pub use config::ServerConfig;
pub use error::ApiError;
pub use model::{DeviceRow, EventRow, JobRow, JobStatus, ResultRow};
pub use routes::{router, AppState};
pub use store::{MemoryStore, Store, StoreError};
