//! Dead letter repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{DeadLetter, DeadLetterRepository, Error, NewDeadLetter, Result};

const COLUMNS: &str = "id, event_id, consumer_group, topic, action, payload, reason, received_at";

pub struct PgDeadLetterRepository {
    pool: Pool<Postgres>,
}

impl PgDeadLetterRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> DeadLetter {
        DeadLetter {
            id: row.get("id"),
            event_id: row.get("event_id"),
            consumer_group: row.get("consumer_group"),
            topic: row.get("topic"),
            action: row.get("action"),
            payload: row.get("payload"),
            reason: row.get("reason"),
            received_at: row.get("received_at"),
        }
    }
}

#[async_trait]
impl DeadLetterRepository for PgDeadLetterRepository {
    async fn insert(&self, letter: NewDeadLetter) -> Result<DeadLetter> {
        let row = sqlx::query(&format!(
            "INSERT INTO dead_letters (event_id, consumer_group, topic, action, payload, reason, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             RETURNING {COLUMNS}"
        ))
        .bind(letter.event_id)
        .bind(&letter.consumer_group)
        .bind(&letter.topic)
        .bind(&letter.action)
        .bind(&letter.payload)
        .bind(&letter.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM dead_letters ORDER BY received_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
