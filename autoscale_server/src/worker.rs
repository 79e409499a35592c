//! Worker loop: drain the job queue in bounded batches and turn events into
//! results.

use std::sync::Arc;

use autoscale_core::{detect, refine, Detection, Refined};
use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::{JobRow, ResultMeta};
use crate::routes::{require_secret, AppState};
use crate::store::{NewResult, Store, StoreError};

pub const DEFAULT_BATCH: usize = 10;
/// How many prior raw weights feed the consensus.
pub const RECENT_WEIGHTS: usize = 10;
/// Consensus tolerance band.
pub const BAND_KG: f64 = 1.0;

/// Claim up to `batch` pending jobs and process them sequentially.
/// A failing job is marked `failed` and never aborts the batch.
/// Returns how many jobs were claimed.
pub async fn drain_batch(store: &dyn Store, batch: usize) -> Result<usize, StoreError> {
    let jobs = store.claim_jobs(batch).await?;
    let picked = jobs.len();
    info!(picked, "worker batch claimed");
    for job in jobs {
        let job_id = job.id;
        if let Err(e) = process_job(store, &job).await {
            warn!(job_id = %job_id, error = %e, "job failed");
            store.fail_job(job_id, e.to_string()).await?;
        }
    }
    Ok(picked)
}

async fn process_job(store: &dyn Store, job: &JobRow) -> eyre::Result<()> {
    let event = store
        .event(job.event_id)
        .await?
        .ok_or_else(|| eyre::eyre!("event {} not found", job.event_id))?;

    if event.samples.is_empty() {
        info!(event_id = %event.id, "empty event; no result");
        store
            .complete_job(job.id, Some("no samples".to_string()))
            .await?;
        return Ok(());
    }

    let raw = detect(&event.samples)?;
    let recent = store
        .recent_raw_weights(event.device_row_id, RECENT_WEIGHTS, event.id)
        .await?;
    let outcome = refine(&event.samples, &raw, &recent, BAND_KG);

    let meta = ResultMeta {
        consensus_sources: outcome.sources,
        consensus_kg: round_kg(outcome.consensus_kg),
    };
    let result = store
        .insert_result(NewResult {
            event_id: event.id,
            raw: round_detection(raw),
            consensus: outcome.refined.map(round_refined),
            meta,
        })
        .await?;
    store.complete_job(job.id, None).await?;

    info!(
        event_id = %event.id,
        result_id = %result.id,
        weight_kg = result.raw.weight_kg,
        mode = %result.raw.mode,
        refined = result.consensus.is_some(),
        "job done"
    );
    Ok(())
}

/// Weights to 10 µg, window bounds to 1 ms, slope to 1e-6.
fn round_detection(mut d: Detection) -> Detection {
    d.weight_kg = round_kg(d.weight_kg);
    d.uncertainty_kg = round_kg(d.uncertainty_kg);
    d.mean_std = round_kg(d.mean_std);
    d.start_s = round_s(d.start_s);
    d.end_s = round_s(d.end_s);
    d.duration_s = round_s(d.duration_s);
    d.mean_abs_slope = round_to(d.mean_abs_slope, 1e6);
    d
}

fn round_refined(mut r: Refined) -> Refined {
    r.weight_kg = round_kg(r.weight_kg);
    r.uncertainty_kg = round_kg(r.uncertainty_kg);
    r.start_s = round_s(r.start_s);
    r.end_s = round_s(r.end_s);
    r.duration_s = round_s(r.duration_s);
    r
}

fn round_kg(x: f64) -> f64 {
    round_to(x, 1e5)
}

fn round_s(x: f64) -> f64 {
    round_to(x, 1e3)
}

fn round_to(x: f64, scale: f64) -> f64 {
    (x * scale).round() / scale
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub batch: Option<usize>,
}

/// POST /process?batch=n
pub async fn handle(
    Extension(app): Extension<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_secret(
        &headers,
        app.config.processor_secret.as_deref(),
        "FUNCTION_SECRET_PROCESSOR",
    )?;
    let batch = query.batch.unwrap_or(DEFAULT_BATCH).max(1);
    let picked = drain_batch(app.store.as_ref(), batch).await?;
    Ok(Json(json!({ "ok": true, "picked": picked })))
}

/// Manual re-enqueue for operators: failed jobs stay failed; this queues a
/// fresh pending job for the event instead of reviving the old row.
pub async fn reprocess_event(store: &dyn Store, event_id: Uuid) -> Result<bool, StoreError> {
    let Some(event) = store.event(event_id).await? else {
        return Ok(false);
    };
    let job = store.enqueue_job(event.id).await?;
    info!(event_id = %event.id, job_id = %job.id, "event re-enqueued");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_grids() {
        assert_eq!(round_kg(5.000004), 5.0);
        assert_eq!(round_kg(5.000006), 5.00001);
        assert_eq!(round_s(1.23456), 1.235);
        assert_eq!(round_to(0.00000016, 1e6), 0.0);
    }
}
