//! Storage seam and the in-memory reference implementation.
//!
//! The relational backend is substitutable; everything the handlers and the
//! worker need is behind this trait. The one non-trivial coordination point
//! is `claim_jobs`: a conditional flip on `status == Pending` executed
//! atomically (here, inside one lock scope), never a read-then-write.

use async_trait::async_trait;
use autoscale_core::{Detection, EventStats, Refined, Sample};
use chrono::Utc;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{DeviceRow, EventRow, JobRow, JobStatus, ResultMeta, ResultRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store timeout")]
    Timeout,
    #[error("store error: {0}")]
    Internal(String),
}

/// Result fields the worker persists; the store stamps id and time.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub event_id: Uuid,
    pub raw: Detection,
    pub consensus: Option<Refined>,
    pub meta: ResultMeta,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent upsert keyed on `device_id`; returns the canonical row.
    async fn upsert_device(
        &self,
        device_id: &str,
        household_id: &str,
        display_name: &str,
    ) -> Result<DeviceRow, StoreError>;

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRow>, StoreError>;

    /// Write the event and enqueue its pending job as one consistent unit.
    async fn insert_event(
        &self,
        device_row_id: Uuid,
        t0_epoch_ms: Option<i64>,
        samples: Vec<Sample>,
    ) -> Result<(EventRow, JobRow), StoreError>;

    async fn event(&self, id: Uuid) -> Result<Option<EventRow>, StoreError>;

    /// Queue a fresh pending job for an existing event (manual re-enqueue).
    async fn enqueue_job(&self, event_id: Uuid) -> Result<JobRow, StoreError>;

    /// Atomically flip up to `batch` pending jobs (oldest first) to
    /// processing, stamping `picked_at` and bumping `attempts`.
    async fn claim_jobs(&self, batch: usize) -> Result<Vec<JobRow>, StoreError>;

    async fn job(&self, id: Uuid) -> Result<Option<JobRow>, StoreError>;

    /// Newest-first raw detector weights for the device, excluding results
    /// of `exclude_event`, at most `limit` entries.
    async fn recent_raw_weights(
        &self,
        device_row_id: Uuid,
        limit: usize,
        exclude_event: Uuid,
    ) -> Result<Vec<f64>, StoreError>;

    async fn insert_result(&self, new: NewResult) -> Result<ResultRow, StoreError>;

    /// Results for one event, newest first.
    async fn results_for_event(&self, event_id: Uuid) -> Result<Vec<ResultRow>, StoreError>;

    /// Terminal success; `note` lands in the job's error column (used for
    /// benign outcomes like "no samples").
    async fn complete_job(&self, job_id: Uuid, note: Option<String>) -> Result<(), StoreError>;

    /// Terminal failure with the error message.
    async fn fail_job(&self, job_id: Uuid, error: String) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    devices: Vec<DeviceRow>,
    events: Vec<EventRow>,
    jobs: Vec<JobRow>,
    results: Vec<ResultRow>,
}

/// Reference store: a single mutex over plain vectors. Claim atomicity
/// falls out of the lock; a SQL backend gets it from a conditional UPDATE.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_device(
        &self,
        device_id: &str,
        household_id: &str,
        display_name: &str,
    ) -> Result<DeviceRow, StoreError> {
        let mut inner = self.lock();
        if let Some(row) = inner.devices.iter_mut().find(|d| d.device_id == device_id) {
            // conflict target: keep the row, refresh the mutable columns
            row.household_id = household_id.to_string();
            row.display_name = display_name.to_string();
            return Ok(row.clone());
        }
        let row = DeviceRow {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            household_id: household_id.to_string(),
            display_name: display_name.to_string(),
        };
        inner.devices.push(row.clone());
        Ok(row)
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceRow>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned())
    }

    async fn insert_event(
        &self,
        device_row_id: Uuid,
        t0_epoch_ms: Option<i64>,
        samples: Vec<Sample>,
    ) -> Result<(EventRow, JobRow), StoreError> {
        let stats = EventStats::of(&samples);
        let event = EventRow {
            id: Uuid::new_v4(),
            device_row_id,
            t0_epoch_ms,
            samples,
            sample_count: stats.sample_count,
            peak_kg: stats.peak_kg,
            ingested_at: Utc::now(),
        };
        let job = JobRow {
            id: Uuid::new_v4(),
            event_id: event.id,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            picked_at: None,
            done_at: None,
            attempts: 0,
            error: None,
        };
        let mut inner = self.lock();
        inner.events.push(event.clone());
        inner.jobs.push(job.clone());
        Ok((event, job))
    }

    async fn event(&self, id: Uuid) -> Result<Option<EventRow>, StoreError> {
        let inner = self.lock();
        Ok(inner.events.iter().find(|e| e.id == id).cloned())
    }

    async fn enqueue_job(&self, event_id: Uuid) -> Result<JobRow, StoreError> {
        let mut inner = self.lock();
        if !inner.events.iter().any(|e| e.id == event_id) {
            return Err(StoreError::Internal(format!("event {event_id} not found")));
        }
        let job = JobRow {
            id: Uuid::new_v4(),
            event_id,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            picked_at: None,
            done_at: None,
            attempts: 0,
            error: None,
        };
        inner.jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_jobs(&self, batch: usize) -> Result<Vec<JobRow>, StoreError> {
        let mut inner = self.lock();
        let mut pending: Vec<usize> = inner
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| inner.jobs[i].created_at);
        pending.truncate(batch);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(pending.len());
        for i in pending {
            let job = &mut inner.jobs[i];
            job.status = JobStatus::Processing;
            job.picked_at = Some(now);
            job.attempts += 1;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn job(&self, id: Uuid) -> Result<Option<JobRow>, StoreError> {
        let inner = self.lock();
        Ok(inner.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn recent_raw_weights(
        &self,
        device_row_id: Uuid,
        limit: usize,
        exclude_event: Uuid,
    ) -> Result<Vec<f64>, StoreError> {
        let inner = self.lock();
        let mut rows: Vec<&ResultRow> = inner
            .results
            .iter()
            .filter(|r| r.event_id != exclude_event)
            .filter(|r| {
                inner
                    .events
                    .iter()
                    .any(|e| e.id == r.event_id && e.device_row_id == device_row_id)
            })
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.computed_at));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|r| r.raw.weight_kg)
            .collect())
    }

    async fn insert_result(&self, new: NewResult) -> Result<ResultRow, StoreError> {
        let row = ResultRow {
            id: Uuid::new_v4(),
            event_id: new.event_id,
            computed_at: Utc::now(),
            raw: new.raw,
            consensus: new.consensus,
            meta: new.meta,
        };
        let mut inner = self.lock();
        inner.results.push(row.clone());
        Ok(row)
    }

    async fn results_for_event(&self, event_id: Uuid) -> Result<Vec<ResultRow>, StoreError> {
        let inner = self.lock();
        let mut rows: Vec<ResultRow> = inner
            .results
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.computed_at));
        Ok(rows)
    }

    async fn complete_job(&self, job_id: Uuid, note: Option<String>) -> Result<(), StoreError> {
        self.finish(job_id, JobStatus::Done, note)
    }

    async fn fail_job(&self, job_id: Uuid, error: String) -> Result<(), StoreError> {
        self.finish(job_id, JobStatus::Failed, Some(error))
    }
}

impl MemoryStore {
    fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StoreError::Internal(format!("job {job_id} not found")))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::Internal(format!(
                "job {job_id} is not processing"
            )));
        }
        job.status = status;
        job.done_at = Some(Utc::now());
        job.error = note;
        Ok(())
    }
}
