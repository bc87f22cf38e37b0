//! Project burndown repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{BurndownRepository, BurndownUpsert, Error, ProjectBurndown, Result};

const COLUMNS: &str = "id, project_id, sprint_id, sprint_number, sprint_name, \
    backlog_items_remaining, items_completed_in_sprint, completed_points, \
    sprint_end_date, recorded_at";

/// PostgreSQL burndown repository.
///
/// `sprint_number` is assigned inside the insert statement while holding a
/// transaction-scoped advisory lock on the project, so two sprints of the
/// same project completing at once cannot receive the same number.
pub struct PgBurndownRepository {
    pool: Pool<Postgres>,
}

impl PgBurndownRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> ProjectBurndown {
        ProjectBurndown {
            id: row.get("id"),
            project_id: row.get("project_id"),
            sprint_id: row.get("sprint_id"),
            sprint_number: row.get("sprint_number"),
            sprint_name: row.get("sprint_name"),
            backlog_items_remaining: row.get("backlog_items_remaining"),
            items_completed_in_sprint: row.get("items_completed_in_sprint"),
            completed_points: row.get("completed_points"),
            sprint_end_date: row.get("sprint_end_date"),
            recorded_at: row.get("recorded_at"),
        }
    }
}

#[async_trait]
impl BurndownRepository for PgBurndownRepository {
    async fn upsert(&self, req: BurndownUpsert) -> Result<ProjectBurndown> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(req.project_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "INSERT INTO project_burndown (
                project_id, sprint_id, sprint_number, sprint_name,
                backlog_items_remaining, items_completed_in_sprint,
                completed_points, sprint_end_date, recorded_at
             )
             VALUES (
                $1, $2,
                (SELECT COUNT(*)::int + 1 FROM project_burndown WHERE project_id = $1),
                $3, $4, $5, $6, $7, NOW()
             )
             ON CONFLICT (sprint_id) DO UPDATE SET
                backlog_items_remaining = EXCLUDED.backlog_items_remaining,
                items_completed_in_sprint = EXCLUDED.items_completed_in_sprint,
                completed_points = EXCLUDED.completed_points,
                sprint_end_date = EXCLUDED.sprint_end_date,
                sprint_name = COALESCE(EXCLUDED.sprint_name, project_burndown.sprint_name),
                recorded_at = NOW()
             RETURNING {COLUMNS}"
        ))
        .bind(req.project_id)
        .bind(req.sprint_id)
        .bind(&req.sprint_name)
        .bind(req.backlog_items_remaining)
        .bind(req.items_completed_in_sprint)
        .bind(req.completed_points)
        .bind(req.sprint_end_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<ProjectBurndown>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM project_burndown WHERE sprint_id = $1"
        ))
        .bind(sprint_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_by_project(&self, project_id: i64) -> Result<Vec<ProjectBurndown>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM project_burndown
             WHERE project_id = $1
             ORDER BY sprint_number ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
