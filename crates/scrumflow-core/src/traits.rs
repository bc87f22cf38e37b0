//! Core traits for scrumflow abstractions.
//!
//! Repositories define the storage seams every consumer writes through, so
//! the PostgreSQL implementations can be swapped for in-memory ones in tests.
//! [`PushSink`] is the seam between the fan-out consumer and the live
//! connection gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// AGGREGATE REPOSITORIES
// =============================================================================

/// Team velocity, one row per sprint.
#[async_trait]
pub trait VelocityRepository: Send + Sync {
    /// Insert or update atomically by sprint id.
    async fn upsert(&self, req: VelocityUpsert) -> Result<TeamVelocity>;

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<TeamVelocity>>;

    /// All rows for a team ordered by sprint end date (oldest first).
    async fn list_by_team(&self, team_id: i64) -> Result<Vec<TeamVelocity>>;

    /// The `limit` most recent rows for a team, newest first.
    async fn recent_by_team(&self, team_id: i64, limit: i64) -> Result<Vec<TeamVelocity>>;
}

/// Project burndown, one row per sprint.
#[async_trait]
pub trait BurndownRepository: Send + Sync {
    /// Insert or update atomically by sprint id.
    ///
    /// A new row receives `sprint_number = count(project rows) + 1`; an
    /// existing row keeps its number.
    async fn upsert(&self, req: BurndownUpsert) -> Result<ProjectBurndown>;

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<ProjectBurndown>>;

    /// Rows for a project ordered by sprint number.
    async fn list_by_project(&self, project_id: i64) -> Result<Vec<ProjectBurndown>>;
}

/// Sprint metrics, one row per sprint.
#[async_trait]
pub trait SprintMetricsRepository: Send + Sync {
    async fn upsert(&self, req: MetricsUpsert) -> Result<SprintMetrics>;

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<SprintMetrics>>;

    /// Rows for a project, most recently calculated first.
    async fn list_by_project(&self, project_id: i64) -> Result<Vec<SprintMetrics>>;
}

/// Daily burndown series.
#[async_trait]
pub trait DailyBurndownRepository: Send + Sync {
    /// Replace every row of a sprint with `rows` in one transaction.
    async fn replace_for_sprint(&self, sprint_id: i64, rows: Vec<DailyBurndown>) -> Result<usize>;

    /// Rows for a sprint ordered by date.
    async fn list_for_sprint(&self, sprint_id: i64) -> Result<Vec<DailyBurndown>>;
}

// =============================================================================
// ACTIVITY & NOTIFICATIONS
// =============================================================================

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn insert(&self, entry: NewActivityLog) -> Result<ActivityLog>;

    /// Latest entries for a project, newest first.
    async fn list_for_project(&self, project_id: i64, limit: i64) -> Result<Vec<ActivityLog>>;

    /// Latest entries performed by a user, newest first.
    async fn list_for_actor(&self, actor_id: i64, limit: i64) -> Result<Vec<ActivityLog>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, req: NewNotification) -> Result<Notification>;

    /// Latest notifications for a user, newest first.
    async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Notification>>;

    async fn unread_count(&self, user_id: i64) -> Result<i64>;

    /// Mark one notification read. `None` if it does not exist.
    async fn mark_read(&self, id: i64) -> Result<Option<Notification>>;

    /// Mark every unread notification of a user read; returns rows changed.
    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;
}

// =============================================================================
// LOGS & DEAD LETTERS
// =============================================================================

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn insert(&self, entry: NewLogEntry) -> Result<LogEntry>;

    /// Insert a drained batch; returns rows inserted.
    async fn insert_batch(&self, entries: Vec<NewLogEntry>) -> Result<u64>;

    /// Entries with `from <= timestamp <= to`, oldest first.
    async fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<LogEntry>>;

    /// Purge every entry; returns rows deleted.
    async fn delete_all(&self) -> Result<u64>;

    async fn count(&self) -> Result<i64>;
}

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn insert(&self, letter: NewDeadLetter) -> Result<DeadLetter>;

    /// Latest dead letters, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<DeadLetter>>;
}

// =============================================================================
// PUSH
// =============================================================================

/// Server-initiated delivery to live connections.
///
/// Delivery is fire-and-forget: targets with no live connection drop the
/// message silently.
pub trait PushSink: Send + Sync {
    /// Deliver to every connection in room `project-{project_id}`.
    fn emit_to_project(&self, project_id: i64, event: &str, data: &JsonValue);

    /// Deliver to every connection in room `sprint-{sprint_id}`.
    fn emit_to_sprint(&self, sprint_id: i64, event: &str, data: &JsonValue);

    /// Deliver to every live connection of a user.
    fn emit_to_user(&self, user_id: i64, event: &str, data: &JsonValue);
}
