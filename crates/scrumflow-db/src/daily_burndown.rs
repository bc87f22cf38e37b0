//! Daily burndown series repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::debug;

use scrumflow_core::{DailyBurndown, DailyBurndownRepository, Error, Result};

pub struct PgDailyBurndownRepository {
    pool: Pool<Postgres>,
}

impl PgDailyBurndownRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> DailyBurndown {
        DailyBurndown {
            sprint_id: row.get("sprint_id"),
            date: row.get("date"),
            remaining_points: row.get("remaining_points"),
            ideal_remaining_points: row.get("ideal_remaining_points"),
            completed_points: row.get("completed_points"),
            added_points: row.get("added_points"),
        }
    }
}

#[async_trait]
impl DailyBurndownRepository for PgDailyBurndownRepository {
    async fn replace_for_sprint(&self, sprint_id: i64, rows: Vec<DailyBurndown>) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let deleted = sqlx::query("DELETE FROM daily_burndown WHERE sprint_id = $1")
            .bind(sprint_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        for day in &rows {
            sqlx::query(
                "INSERT INTO daily_burndown (
                    sprint_id, date, remaining_points, ideal_remaining_points,
                    completed_points, added_points
                 )
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(sprint_id)
            .bind(day.date)
            .bind(day.remaining_points)
            .bind(day.ideal_remaining_points)
            .bind(day.completed_points)
            .bind(day.added_points)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            db_table = "daily_burndown",
            sprint_id,
            deleted,
            count = rows.len(),
            "Replaced daily burndown series"
        );
        Ok(rows.len())
    }

    async fn list_for_sprint(&self, sprint_id: i64) -> Result<Vec<DailyBurndown>> {
        let rows = sqlx::query(
            "SELECT sprint_id, date, remaining_points, ideal_remaining_points,
                    completed_points, added_points
             FROM daily_burndown
             WHERE sprint_id = $1
             ORDER BY date ASC",
        )
        .bind(sprint_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
