//! Device registry endpoint: idempotent upsert keyed on the stable device
//! identifier.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::routes::{bounded, require_secret, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub household_id: Option<String>,
}

/// POST /devices
pub async fn handle(
    Extension(app): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<Value>, ApiError> {
    require_secret(
        &headers,
        app.config.processor_secret.as_deref(),
        "FUNCTION_SECRET_PROCESSOR",
    )?;
    let payload: RegisterPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    let device_id = payload
        .device_id
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::BadRequest("device_id must be non-empty".to_string()))?;
    let household_id = payload
        .household_id
        .or_else(|| app.config.default_household_id.clone())
        .ok_or_else(|| {
            ApiError::BadRequest("household_id missing and no default configured".to_string())
        })?;
    let display_name = payload.display_name.unwrap_or_else(|| device_id.clone());

    let row = bounded(app.store.upsert_device(&device_id, &household_id, &display_name)).await?;
    info!(device_id = %row.device_id, row_id = %row.id, "device registered");
    Ok(Json(json!({
        "ok": true,
        "scale": {
            "id": row.id,
            "household_id": row.household_id,
            "device_id": row.device_id,
            "display_name": row.display_name,
        }
    })))
}
