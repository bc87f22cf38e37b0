//! Activity log repository.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{ActivityLog, ActivityRepository, Error, NewActivityLog, Result};

const COLUMNS: &str = "id, actor_id, action, entity_type, entity_id, project_id, details, timestamp";

pub struct PgActivityRepository {
    pool: Pool<Postgres>,
}

impl PgActivityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> ActivityLog {
        let details: Option<JsonValue> = row.get("details");
        ActivityLog {
            id: row.get("id"),
            actor_id: row.get("actor_id"),
            action: row.get("action"),
            entity_type: row.get("entity_type"),
            entity_id: row.get("entity_id"),
            project_id: row.get("project_id"),
            details: details.unwrap_or(JsonValue::Null),
            timestamp: row.get("timestamp"),
        }
    }
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn insert(&self, entry: NewActivityLog) -> Result<ActivityLog> {
        let row = sqlx::query(&format!(
            "INSERT INTO activity_logs (actor_id, action, entity_type, entity_id, project_id, details, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             RETURNING {COLUMNS}"
        ))
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.project_id)
        .bind(&entry.details)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn list_for_project(&self, project_id: i64, limit: i64) -> Result<Vec<ActivityLog>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM activity_logs
             WHERE project_id = $1
             ORDER BY timestamp DESC, id DESC
             LIMIT $2"
        ))
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn list_for_actor(&self, actor_id: i64, limit: i64) -> Result<Vec<ActivityLog>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM activity_logs
             WHERE actor_id = $1
             ORDER BY timestamp DESC, id DESC
             LIMIT $2"
        ))
        .bind(actor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
