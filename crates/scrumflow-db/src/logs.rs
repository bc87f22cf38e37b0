//! Ingested log repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use scrumflow_core::{Error, LogEntry, LogRepository, LogType, NewLogEntry, Result};

const COLUMNS: &str =
    "id, timestamp, log_type, url, correlation_id, application_name, message, created_at";

/// Postgres caps bind parameters at 65535; seven columns per row.
const INSERT_CHUNK: usize = 1000;

pub struct PgLogRepository {
    pool: Pool<Postgres>,
}

impl PgLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<LogEntry> {
        let log_type: String = row.get("log_type");
        Ok(LogEntry {
            id: row.get("id"),
            timestamp: row.get("timestamp"),
            log_type: log_type.parse::<LogType>()?,
            url: row.get("url"),
            correlation_id: row.get("correlation_id"),
            application_name: row.get("application_name"),
            message: row.get("message"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl LogRepository for PgLogRepository {
    async fn insert(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let row = sqlx::query(&format!(
            "INSERT INTO logs (id, timestamp, log_type, url, correlation_id, application_name, message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
             RETURNING {COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(entry.timestamp)
        .bind(entry.log_type.as_str())
        .bind(&entry.url)
        .bind(&entry.correlation_id)
        .bind(&entry.application_name)
        .bind(&entry.message)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_row(&row)
    }

    async fn insert_batch(&self, entries: Vec<NewLogEntry>) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0u64;

        for chunk in entries.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO logs (id, timestamp, log_type, url, correlation_id, application_name, message) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(Uuid::now_v7())
                    .push_bind(entry.timestamp)
                    .push_bind(entry.log_type.as_str())
                    .push_bind(entry.url.clone())
                    .push_bind(entry.correlation_id.clone())
                    .push_bind(entry.application_name.clone())
                    .push_bind(entry.message.clone());
            });
            inserted += builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?
                .rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM logs
             WHERE timestamp BETWEEN $1 AND $2
             ORDER BY timestamp ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM logs")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}
