//! Team velocity repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{Error, Result, TeamVelocity, VelocityRepository, VelocityUpsert};

const COLUMNS: &str = "id, team_id, sprint_id, sprint_name, velocity, sprint_end_date, calculated_at";

/// PostgreSQL velocity repository.
pub struct PgVelocityRepository {
    pool: Pool<Postgres>,
}

impl PgVelocityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> TeamVelocity {
        TeamVelocity {
            id: row.get("id"),
            team_id: row.get("team_id"),
            sprint_id: row.get("sprint_id"),
            sprint_name: row.get("sprint_name"),
            velocity: row.get("velocity"),
            sprint_end_date: row.get("sprint_end_date"),
            calculated_at: row.get("calculated_at"),
        }
    }
}

#[async_trait]
impl VelocityRepository for PgVelocityRepository {
    async fn upsert(&self, req: VelocityUpsert) -> Result<TeamVelocity> {
        let row = sqlx::query(&format!(
            "INSERT INTO team_velocity (team_id, sprint_id, sprint_name, velocity, sprint_end_date, calculated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (sprint_id) DO UPDATE SET
                velocity = EXCLUDED.velocity,
                sprint_end_date = EXCLUDED.sprint_end_date,
                sprint_name = COALESCE(EXCLUDED.sprint_name, team_velocity.sprint_name),
                calculated_at = NOW()
             RETURNING {COLUMNS}"
        ))
        .bind(req.team_id)
        .bind(req.sprint_id)
        .bind(&req.sprint_name)
        .bind(req.velocity)
        .bind(req.sprint_end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<TeamVelocity>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM team_velocity WHERE sprint_id = $1"
        ))
        .bind(sprint_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_by_team(&self, team_id: i64) -> Result<Vec<TeamVelocity>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM team_velocity
             WHERE team_id = $1
             ORDER BY sprint_end_date ASC NULLS FIRST, id ASC"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn recent_by_team(&self, team_id: i64, limit: i64) -> Result<Vec<TeamVelocity>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM team_velocity
             WHERE team_id = $1
             ORDER BY sprint_end_date DESC NULLS LAST, id DESC
             LIMIT $2"
        ))
        .bind(team_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
