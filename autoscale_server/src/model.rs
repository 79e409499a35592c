//! Server-side rows: devices, events, jobs, results.

use autoscale_core::{Detection, Refined, Sample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A registered scale: stable external identifier plus household grouping.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRow {
    pub id: Uuid,
    pub device_id: String,
    pub household_id: String,
    pub display_name: String,
}

/// One captured weighing event; immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: Uuid,
    pub device_row_id: Uuid,
    /// Advisory anchor from the device (often uptime, not wall clock).
    pub t0_epoch_ms: Option<i64>,
    pub samples: Vec<Sample>,
    pub sample_count: usize,
    pub peak_kg: f64,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// Event-scoped work item. States only move forward:
/// pending → processing → done | failed.
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    /// Incremented on every claim.
    pub attempts: u32,
    pub error: Option<String>,
}

/// Metadata bag carried with every result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultMeta {
    /// Weights the consensus median was computed over.
    pub consensus_sources: usize,
    pub consensus_kg: f64,
}

/// Append-only processing output; the newest row per event is authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub raw: Detection,
    pub consensus: Option<Refined>,
    pub meta: ResultMeta,
}
