//! Notification repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};

use scrumflow_core::{
    Error, NewNotification, Notification, NotificationRepository, NotificationType, Result,
};

const COLUMNS: &str = "id, recipient_id, type, payload, read, created_at, read_at";

pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<Notification> {
        let kind: String = row.get("type");
        Ok(Notification {
            id: row.get("id"),
            recipient_id: row.get("recipient_id"),
            notification_type: kind.parse::<NotificationType>()?,
            payload: row.get("payload"),
            read: row.get("read"),
            created_at: row.get("created_at"),
            read_at: row.get("read_at"),
        })
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, req: NewNotification) -> Result<Notification> {
        let row = sqlx::query(&format!(
            "INSERT INTO notifications (recipient_id, type, payload, read, created_at)
             VALUES ($1, $2, $3, FALSE, NOW())
             RETURNING {COLUMNS}"
        ))
        .bind(req.recipient_id)
        .bind(req.notification_type.as_str())
        .bind(&req.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_row(&row)
    }

    async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM notifications
             WHERE recipient_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND read = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }

    async fn mark_read(&self, id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "UPDATE notifications
             SET read = TRUE, read_at = COALESCE(read_at, NOW())
             WHERE id = $1
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications
             SET read = TRUE, read_at = NOW()
             WHERE recipient_id = $1 AND read = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
