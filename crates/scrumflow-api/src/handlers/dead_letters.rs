use axum::extract::{Query, State};
use axum::Json;

use scrumflow_core::DeadLetter;

use super::LimitQuery;
use crate::{ApiError, AppState};

/// `GET /dead-letters?limit=`, newest first.
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<DeadLetter>>, ApiError> {
    Ok(Json(state.db.dead_letters.list_recent(query.resolve()).await?))
}
