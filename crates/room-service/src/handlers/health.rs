//! Health check handlers.
//!
//! - `/health`: Liveness check - returns OK if the process is running
//! - `/ready`: Readiness check - pings the session store

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness check handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check handler.
///
/// Returns 200 when the session store answers a ping, 503 otherwise. The
/// error message is generic; the cause is logged.
#[tracing::instrument(skip_all, name = "room.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = state.store.ping().await {
        tracing::warn!(target: "room.http", error = %e, "Readiness check failed: session store");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                session_store: Some("unhealthy"),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            session_store: Some("healthy"),
            error: None,
        }),
    )
}
