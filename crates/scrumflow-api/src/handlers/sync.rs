//! Sync triggers.
//!
//! - `POST /sync/sprint/:id` pulls one sprint from the Scrum service
//! - `POST /sync/all` pulls every sprint
//! - `POST /sync/sprint-completion` reconciles a completion body directly

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{info, warn};

use scrumflow_core::events::SprintCompleted;
use scrumflow_jobs::SyncAllReport;

use crate::{ApiError, AppState};

pub async fn sync_sprint(
    State(state): State<AppState>,
    Path(sprint_id): Path<i64>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = state
        .sync
        .sync_sprint(sprint_id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to sync sprint {}", sprint_id), e))?;
    Ok(Json(json!({ "message": outcome.message(sprint_id) })))
}

pub async fn sync_all(State(state): State<AppState>) -> Result<Json<SyncAllReport>, ApiError> {
    let report = state
        .sync
        .sync_all()
        .await
        .map_err(|e| ApiError::internal("Failed to sync sprints", e))?;
    Ok(Json(report))
}

/// Record a completed sprint without going through the bus.
///
/// Accepts the same body as a `scrum.sprint` completion event. A body that
/// is not a JSON object, or lacks the ids, is a 400. Returns 500 if any
/// aggregate step failed; skipped steps are not failures.
pub async fn record_sprint_completion(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, JsonValue>>, JsonRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request("Invalid JSON body", e.body_text()))?;
    let event = SprintCompleted::from_payload(&body)
        .map_err(|e| ApiError::bad_request("Invalid sprint completion payload", e))?;

    info!(
        subsystem = "api",
        op = "sprint_completion",
        sprint_id = event.sprint_id,
        sprint_name = event.sprint_name.as_deref().unwrap_or(""),
        "Recording sprint completion"
    );

    let report = state.reconciler.reconcile(&event).await;
    if !report.is_success() {
        warn!(subsystem = "api", sprint_id = event.sprint_id, "Sprint completion partially failed");
        let details = serde_json::to_string(&report).unwrap_or_default();
        return Err(ApiError::Internal {
            error: format!("Failed to record sprint completion for sprint {}", event.sprint_id),
            details,
        });
    }

    Ok(Json(json!({
        "success": true,
        "message": "Sprint metrics recorded successfully",
        "sprintId": event.sprint_id,
        "velocity": report.velocity,
    })))
}
