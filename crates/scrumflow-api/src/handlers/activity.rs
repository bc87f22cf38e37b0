use axum::extract::{Path, Query, State};
use axum::Json;

use scrumflow_core::ActivityLog;

use super::LimitQuery;
use crate::{ApiError, AppState};

/// `GET /activity/project/:project_id?limit=`
pub async fn project_activity(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ActivityLog>>, ApiError> {
    Ok(Json(
        state
            .db
            .activity
            .list_for_project(project_id, query.resolve())
            .await?,
    ))
}

/// `GET /activity/user/:user_id?limit=`
pub async fn user_activity(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ActivityLog>>, ApiError> {
    Ok(Json(
        state
            .db
            .activity
            .list_for_actor(user_id, query.resolve())
            .await?,
    ))
}
