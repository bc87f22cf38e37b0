//! Log store endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::info;

use scrumflow_core::events::parse_datetime_str;

use crate::{ApiError, AppState};

/// Drain the log queue into storage (`POST /logs`).
pub async fn download_logs(State(state): State<AppState>) -> Result<Json<JsonValue>, ApiError> {
    let report = state
        .log_drain
        .drain()
        .await
        .map_err(|e| ApiError::internal("Failed to download logs from RabbitMQ", e))?;

    let message = if report.count == 0 {
        "No logs found in RabbitMQ queue"
    } else {
        "Logs downloaded and stored successfully"
    };
    Ok(Json(json!({
        "message": message,
        "count": report.count,
        "rejected": report.rejected,
    })))
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:mm:ss` (UTC) or RFC 3339.
pub fn parse_range_bound(raw: &str) -> Option<DateTime<Utc>> {
    parse_datetime_str(raw).ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|dt| dt.and_utc())
    })
}

/// `GET /logs/:from/:to`
pub async fn logs_by_range(
    State(state): State<AppState>,
    Path((date_from, date_to)): Path<(String, String)>,
) -> Result<Json<JsonValue>, ApiError> {
    let (Some(from), Some(to)) = (parse_range_bound(&date_from), parse_range_bound(&date_to)) else {
        return Err(ApiError::bad_request(
            "Invalid date format. Use YYYY-MM-DD or YYYY-MM-DDTHH:mm:ss",
            format!("dateFrom={}, dateTo={}", date_from, date_to),
        ));
    };
    if from > to {
        return Err(ApiError::bad_request(
            "dateFrom must be before dateTo",
            format!("{} is after {}", date_from, date_to),
        ));
    }

    let logs = state
        .db
        .logs
        .list_range(from, to)
        .await
        .map_err(|e| ApiError::internal("Failed to retrieve logs", e))?;

    Ok(Json(json!({
        "dateFrom": from.to_rfc3339_opts(SecondsFormat::Millis, true),
        "dateTo": to.to_rfc3339_opts(SecondsFormat::Millis, true),
        "count": logs.len(),
        "logs": logs,
    })))
}

/// `DELETE /logs`
pub async fn delete_logs(State(state): State<AppState>) -> Result<Json<JsonValue>, ApiError> {
    let count = state
        .db
        .logs
        .delete_all()
        .await
        .map_err(|e| ApiError::internal("Failed to delete logs", e))?;
    info!(subsystem = "api", count, "Deleted all logs");
    Ok(Json(json!({
        "message": "All logs deleted successfully",
        "count": count,
    })))
}
