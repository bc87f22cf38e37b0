//! Read-only aggregate queries: velocity, burndown and sprint metrics.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use scrumflow_core::defaults::VELOCITY_AVERAGE_SPRINTS;
use scrumflow_core::{
    DailyBurndown, ProjectBurndown, SprintMetrics, TeamVelocity, VelocityAverage,
};

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct AverageQuery {
    pub sprints: Option<i64>,
}

/// `GET /velocity/team/:team_id`
pub async fn team_velocity(
    State(state): State<AppState>,
    Path(team_id): Path<i64>,
) -> Result<Json<Vec<TeamVelocity>>, ApiError> {
    Ok(Json(state.db.velocity.list_by_team(team_id).await?))
}

/// `GET /velocity/team/:team_id/average?sprints=N`
pub async fn team_velocity_average(
    State(state): State<AppState>,
    Path(team_id): Path<i64>,
    Query(query): Query<AverageQuery>,
) -> Result<Json<VelocityAverage>, ApiError> {
    let sprints = query.sprints.unwrap_or(VELOCITY_AVERAGE_SPRINTS);
    if sprints < 1 {
        return Err(ApiError::bad_request(
            "Invalid sprints parameter",
            format!("sprints must be at least 1, got {}", sprints),
        ));
    }
    let recent = state.db.velocity.recent_by_team(team_id, sprints).await?;
    Ok(Json(VelocityAverage::from_recent(recent)))
}

/// `GET /burndown/project/:project_id`
pub async fn project_burndown(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<ProjectBurndown>>, ApiError> {
    Ok(Json(state.db.burndown.list_by_project(project_id).await?))
}

/// `GET /burndown/sprint/:sprint_id`
pub async fn sprint_burndown(
    State(state): State<AppState>,
    Path(sprint_id): Path<i64>,
) -> Result<Json<Vec<DailyBurndown>>, ApiError> {
    Ok(Json(state.db.daily_burndown.list_for_sprint(sprint_id).await?))
}

/// `GET /sprint-metrics/sprint/:sprint_id`
pub async fn sprint_metrics(
    State(state): State<AppState>,
    Path(sprint_id): Path<i64>,
) -> Result<Json<SprintMetrics>, ApiError> {
    state
        .db
        .metrics
        .get_by_sprint(sprint_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No metrics for sprint {}", sprint_id)))
}

/// `GET /sprint-metrics/project/:project_id`
pub async fn project_metrics(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<SprintMetrics>>, ApiError> {
    Ok(Json(state.db.metrics.list_by_project(project_id).await?))
}
