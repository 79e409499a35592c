//! Router assembly, shared state, and the cross-cutting request helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::store::{Store, StoreError};
use crate::{aggregate, ingest, registry, worker};

/// Bound on any single store call.
const DB_TIMEOUT: Duration = Duration::from_secs(7);

pub const SECRET_HEADER: &str = "x-function-secret";

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: ServerConfig,
}

/// CORS is permissive on purpose: devices and browser dashboards post from
/// arbitrary origins; the shared secret is the actual gate.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest", post(ingest::handle))
        .route("/process", post(worker::handle))
        .route("/devices", post(registry::handle))
        .route("/events/:id/summary", get(aggregate::handle))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

/// Check the shared-secret header. A missing server-side secret is a
/// misconfiguration (500), never an open door.
pub fn require_secret(
    headers: &HeaderMap,
    expected: Option<&str>,
    env_name: &'static str,
) -> Result<(), ApiError> {
    let expected = expected.ok_or(ApiError::Misconfigured(env_name))?;
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

/// Run one store call under the 7 s database bound.
pub async fn bounded<T>(
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(DB_TIMEOUT, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::DbTimeout("store call exceeded 7s")),
    }
}
