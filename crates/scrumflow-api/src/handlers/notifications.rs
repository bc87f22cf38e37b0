//! Notification inbox endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value as JsonValue};

use scrumflow_core::defaults::PAGE_LIMIT;
use scrumflow_core::Notification;

use crate::{ApiError, AppState};

/// `GET /notifications/user/:user_id`, newest first.
pub async fn user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(
        state
            .db
            .notifications
            .list_for_user(user_id, PAGE_LIMIT)
            .await?,
    ))
}

/// `GET /notifications/user/:user_id/unread-count`
pub async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<JsonValue>, ApiError> {
    let count = state.db.notifications.unread_count(user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// `PATCH /notifications/:id/read`
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Notification>, ApiError> {
    state
        .db
        .notifications
        .mark_read(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Notification {} not found", id)))
}

/// `PATCH /notifications/user/:user_id/read-all`
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<JsonValue>, ApiError> {
    let updated = state.db.notifications.mark_all_read(user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}
