//! Per-event statistics for consumers: peak, count, time-of-event, and the
//! morning/night split the display layer keys on.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::model::EventRow;
use crate::routes::{require_secret, AppState};

/// Anchors earlier than this are treated as device uptime, not wall clock.
const MIN_PLAUSIBLE_EPOCH_MS: i64 = 978_307_200_000; // 2001-01-01

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DayPhase {
    Morning,
    Night,
}

/// Hour-of-day split: before 15:00 counts as Morning.
pub fn classify_hour(hour: u32) -> DayPhase {
    if hour < 15 {
        DayPhase::Morning
    } else {
        DayPhase::Night
    }
}

/// Best-effort event time: the device anchor when it looks like a real
/// epoch, otherwise the ingest time. The anchor is advisory only — some
/// firmware sends uptime.
pub fn event_moment(event: &EventRow) -> DateTime<Utc> {
    match event.t0_epoch_ms {
        Some(ms) if ms >= MIN_PLAUSIBLE_EPOCH_MS => Utc
            .timestamp_millis_opt(ms)
            .single()
            .unwrap_or(event.ingested_at),
        _ => event.ingested_at,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub event_id: Uuid,
    pub sample_count: usize,
    pub peak_kg: f64,
    pub moment: DateTime<Utc>,
    pub phase: DayPhase,
}

pub fn summarize(event: &EventRow) -> EventSummary {
    let moment = event_moment(event);
    EventSummary {
        event_id: event.id,
        sample_count: event.sample_count,
        peak_kg: event.peak_kg,
        moment,
        phase: classify_hour(moment.hour()),
    }
}

/// GET /events/:id/summary
pub async fn handle(
    Extension(app): Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<EventSummary>, ApiError> {
    require_secret(
        &headers,
        app.config.processor_secret.as_deref(),
        "FUNCTION_SECRET_PROCESSOR",
    )?;
    let event = app
        .store
        .event(id)
        .await?
        .ok_or_else(|| ApiError::UnknownDevice(format!("event {id}")))?;
    Ok(Json(summarize(&event)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_core::Sample;

    fn event(t0_epoch_ms: Option<i64>) -> EventRow {
        EventRow {
            id: Uuid::new_v4(),
            device_row_id: Uuid::new_v4(),
            t0_epoch_ms,
            samples: vec![Sample::new(0, 2.0)],
            sample_count: 1,
            peak_kg: 2.0,
            ingested_at: Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap(),
        }
    }

    #[test]
    fn hour_split_at_1500() {
        assert_eq!(classify_hour(0), DayPhase::Morning);
        assert_eq!(classify_hour(14), DayPhase::Morning);
        assert_eq!(classify_hour(15), DayPhase::Night);
        assert_eq!(classify_hour(23), DayPhase::Night);
    }

    #[test]
    fn plausible_anchor_wins() {
        // 2025-06-01T08:30:00Z
        let e = event(Some(1_748_766_600_000));
        let summary = summarize(&e);
        assert_eq!(summary.phase, DayPhase::Morning);
    }

    #[test]
    fn uptime_anchor_falls_back_to_ingest_time() {
        let e = event(Some(123_456)); // device uptime, not an epoch
        assert_eq!(event_moment(&e), e.ingested_at);
        assert_eq!(summarize(&e).phase, DayPhase::Night);
    }

    #[test]
    fn missing_anchor_falls_back_to_ingest_time() {
        let e = event(None);
        assert_eq!(event_moment(&e), e.ingested_at);
    }
}
