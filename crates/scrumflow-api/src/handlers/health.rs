use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::AppState;

/// `GET /health`
///
/// Reports unhealthy (503) when the database is unreachable or the log store
/// cannot be counted.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let log_count = match state.db.ping().await {
        Ok(()) => state.db.logs.count().await,
        Err(e) => Err(e),
    };
    match log_count {
        Ok(log_count) => Json(json!({
            "status": "healthy",
            "version": state.version,
            "logCount": log_count,
            "bus": state.bus.backend(),
            "drainMode": state.log_drain.mode().as_str(),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(subsystem = "api", error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "version": state.version,
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
