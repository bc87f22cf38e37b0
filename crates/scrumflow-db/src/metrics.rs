//! Sprint metrics repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{Error, MetricsUpsert, Result, SprintMetrics, SprintMetricsRepository};

const COLUMNS: &str = "id, sprint_id, project_id, team_id, committed_points, completed_points, \
    carried_over_points, velocity, stories_completed, stories_carried_over, bugs_fixed, \
    impediments_count, sprint_start, sprint_end, calculated_at";

pub struct PgSprintMetricsRepository {
    pool: Pool<Postgres>,
}

impl PgSprintMetricsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> SprintMetrics {
        SprintMetrics {
            id: row.get("id"),
            sprint_id: row.get("sprint_id"),
            project_id: row.get("project_id"),
            team_id: row.get("team_id"),
            committed_points: row.get("committed_points"),
            completed_points: row.get("completed_points"),
            carried_over_points: row.get("carried_over_points"),
            velocity: row.get("velocity"),
            stories_completed: row.get("stories_completed"),
            stories_carried_over: row.get("stories_carried_over"),
            bugs_fixed: row.get("bugs_fixed"),
            impediments_count: row.get("impediments_count"),
            sprint_start: row.get("sprint_start"),
            sprint_end: row.get("sprint_end"),
            calculated_at: row.get("calculated_at"),
        }
    }
}

#[async_trait]
impl SprintMetricsRepository for PgSprintMetricsRepository {
    async fn upsert(&self, req: MetricsUpsert) -> Result<SprintMetrics> {
        // Only completion fields move on conflict; committed points and the
        // start date stay as first recorded.
        let row = sqlx::query(&format!(
            "INSERT INTO sprint_metrics (
                sprint_id, project_id, team_id, committed_points, completed_points,
                velocity, stories_completed, sprint_start, sprint_end, calculated_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
             ON CONFLICT (sprint_id) DO UPDATE SET
                completed_points = EXCLUDED.completed_points,
                velocity = EXCLUDED.velocity,
                stories_completed = EXCLUDED.stories_completed,
                sprint_end = EXCLUDED.sprint_end,
                calculated_at = NOW()
             RETURNING {COLUMNS}"
        ))
        .bind(req.sprint_id)
        .bind(req.project_id)
        .bind(req.team_id)
        .bind(req.committed_points)
        .bind(req.completed_points)
        .bind(req.velocity)
        .bind(req.stories_completed)
        .bind(req.sprint_start)
        .bind(req.sprint_end)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<SprintMetrics>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM sprint_metrics WHERE sprint_id = $1"
        ))
        .bind(sprint_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_by_project(&self, project_id: i64) -> Result<Vec<SprintMetrics>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM sprint_metrics
             WHERE project_id = $1
             ORDER BY calculated_at DESC, id DESC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
