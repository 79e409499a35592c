//! Ingest endpoint: validate a device payload, resolve the scale, persist
//! the event, and enqueue its processing job.

use std::sync::Arc;

use autoscale_core::Sample;
use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::routes::{bounded, require_secret, AppState};

/// Shape-validated ingest payload.
#[derive(Debug, Clone)]
pub struct ValidEvent {
    pub scale_id: String,
    pub t0_epoch_ms: Option<i64>,
    pub samples: Vec<Sample>,
}

/// Parse and validate the wire payload, with field-precise error messages.
///
/// The body is decoded by hand rather than through a derive so a malformed
/// sample reports *which* sample is wrong, and so the fuzz target can drive
/// exactly the path the endpoint runs.
pub fn parse_payload(body: &[u8]) -> Result<ValidEvent, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value.as_object().ok_or("payload must be a JSON object")?;

    let scale_id = obj
        .get("scale_id")
        .and_then(Value::as_str)
        .ok_or("scale_id must be a string")?;
    if scale_id.is_empty() {
        return Err("scale_id must be non-empty".to_string());
    }

    let t0_epoch_ms = match obj.get("t0_epoch_ms") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or("t0_epoch_ms must be an integer when present")?,
        ),
    };

    let raw_samples = obj
        .get("samples")
        .and_then(Value::as_array)
        .ok_or("samples must be an array")?;
    if raw_samples.is_empty() {
        return Err("samples must be a non-empty array".to_string());
    }

    let mut samples = Vec::with_capacity(raw_samples.len());
    for (i, s) in raw_samples.iter().enumerate() {
        let obj = s
            .as_object()
            .ok_or_else(|| format!("samples[{i}] must be an object"))?;
        let t = obj
            .get("t")
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("samples[{i}].t must be a number"))?;
        if !t.is_finite() || t < 0.0 {
            return Err(format!("samples[{i}].t must be finite and >= 0"));
        }
        let kg = obj
            .get("kg")
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("samples[{i}].kg must be a number"))?;
        if !kg.is_finite() {
            return Err(format!("samples[{i}].kg must be a finite number"));
        }
        samples.push(Sample::new(t as u64, kg));
    }

    Ok(ValidEvent {
        scale_id: scale_id.to_string(),
        t0_epoch_ms,
        samples,
    })
}

/// POST /ingest
pub async fn handle(
    Extension(app): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    require_secret(&headers, app.config.ingest_secret.as_deref(), "FUNCTION_SECRET")?;
    let valid = parse_payload(&body).map_err(ApiError::BadRequest)?;

    let device = match bounded(app.store.find_device(&valid.scale_id)).await? {
        Some(device) => device,
        None => match app.config.default_household_id.as_deref() {
            Some(household) => {
                bounded(app.store.upsert_device(
                    &valid.scale_id,
                    household,
                    &valid.scale_id,
                ))
                .await?
            }
            None => return Err(ApiError::UnknownDevice(valid.scale_id)),
        },
    };

    let (event, job) = bounded(app.store.insert_event(
        device.id,
        valid.t0_epoch_ms,
        valid.samples,
    ))
    .await?;

    info!(
        event_id = %event.id,
        job_id = %job.id,
        scale_id = %device.device_id,
        sample_count = event.sample_count,
        peak_kg = event.peak_kg,
        "event ingested"
    );
    Ok(Json(json!({
        "ok": true,
        "sample_count": event.sample_count,
        "peak_kg": event.peak_kg,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn accepts_a_well_formed_payload() {
        let body = br#"{"scale_id":"S1","t0_epoch_ms":123,"samples":[{"t":0,"kg":0.0},{"t":100,"kg":4.5}]}"#;
        let v = parse_payload(body).unwrap();
        assert_eq!(v.scale_id, "S1");
        assert_eq!(v.t0_epoch_ms, Some(123));
        assert_eq!(v.samples.len(), 2);
        assert_eq!(v.samples[1].t_ms, 100);
    }

    #[test]
    fn anchor_is_optional() {
        let body = br#"{"scale_id":"S1","samples":[{"t":0,"kg":1.0}]}"#;
        assert_eq!(parse_payload(body).unwrap().t0_epoch_ms, None);
    }

    #[rstest]
    #[case(br#"not json"#.as_slice(), "invalid JSON")]
    #[case(br#"[1,2,3]"#.as_slice(), "object")]
    #[case(br#"{"samples":[{"t":0,"kg":1}]}"#.as_slice(), "scale_id")]
    #[case(br#"{"scale_id":"","samples":[{"t":0,"kg":1}]}"#.as_slice(), "non-empty")]
    #[case(br#"{"scale_id":"S","samples":[]}"#.as_slice(), "non-empty array")]
    #[case(br#"{"scale_id":"S"}"#.as_slice(), "samples")]
    #[case(br#"{"scale_id":"S","t0_epoch_ms":"x","samples":[{"t":0,"kg":1}]}"#.as_slice(), "integer")]
    #[case(br#"{"scale_id":"S","samples":[{"t":-5,"kg":1}]}"#.as_slice(), "samples[0].t")]
    #[case(br#"{"scale_id":"S","samples":[{"t":0,"kg":"heavy"}]}"#.as_slice(), "samples[0].kg")]
    #[case(br#"{"scale_id":"S","samples":[{"t":0,"kg":1},{"t":1}]}"#.as_slice(), "samples[1].kg")]
    fn rejects_with_a_precise_message(#[case] body: &[u8], #[case] needle: &str) {
        let err = parse_payload(body).unwrap_err();
        assert!(err.contains(needle), "{err:?} does not mention {needle:?}");
    }
}
