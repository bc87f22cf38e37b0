//! Core data models for scrumflow.
//!
//! Aggregates (velocity, burndown, metrics) are keyed by sprint id and only
//! ever upserted. Activity rows, notifications, logs and dead letters are
//! append-mostly records. All models serialize in camelCase to match the
//! JSON the Scrum front-ends already consume.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;
use crate::events::parse_datetime_str;

// =============================================================================
// AGGREGATES
// =============================================================================

/// Velocity recorded for one completed sprint of a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamVelocity {
    pub id: i64,
    pub team_id: i64,
    pub sprint_id: i64,
    pub sprint_name: Option<String>,
    pub velocity: f64,
    pub sprint_end_date: Option<DateTime<Utc>>,
    pub calculated_at: DateTime<Utc>,
}

/// Insert-or-update request for [`TeamVelocity`].
///
/// On conflict `velocity` and `sprint_end_date` are overwritten; `sprint_name`
/// only when provided.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityUpsert {
    pub team_id: i64,
    pub sprint_id: i64,
    pub sprint_name: Option<String>,
    pub velocity: f64,
    pub sprint_end_date: Option<DateTime<Utc>>,
}

/// Rolling average over a team's most recent sprints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityAverage {
    pub average_velocity: f64,
    /// Oldest first.
    pub sprints: Vec<TeamVelocity>,
}

impl VelocityAverage {
    /// Build from rows ordered newest first, rounding to two decimals.
    pub fn from_recent(mut recent: Vec<TeamVelocity>) -> Self {
        let average = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|v| v.velocity).sum::<f64>() / recent.len() as f64
        };
        recent.reverse();
        Self {
            average_velocity: (average * 100.0).round() / 100.0,
            sprints: recent,
        }
    }
}

/// Per-sprint burndown summary within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBurndown {
    pub id: i64,
    pub project_id: i64,
    pub sprint_id: i64,
    /// 1-based position of the sprint within its project, fixed at insert.
    pub sprint_number: i32,
    pub sprint_name: Option<String>,
    pub backlog_items_remaining: i32,
    pub items_completed_in_sprint: i32,
    pub completed_points: f64,
    pub sprint_end_date: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

/// Insert-or-update request for [`ProjectBurndown`].
#[derive(Debug, Clone, PartialEq)]
pub struct BurndownUpsert {
    pub project_id: i64,
    pub sprint_id: i64,
    pub sprint_name: Option<String>,
    pub backlog_items_remaining: i32,
    pub items_completed_in_sprint: i32,
    pub completed_points: f64,
    pub sprint_end_date: Option<DateTime<Utc>>,
}

/// Full metrics for one sprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintMetrics {
    pub id: i64,
    pub sprint_id: i64,
    pub project_id: i64,
    pub team_id: Option<i64>,
    pub committed_points: f64,
    pub completed_points: f64,
    pub carried_over_points: f64,
    pub velocity: f64,
    pub stories_completed: i32,
    pub stories_carried_over: i32,
    pub bugs_fixed: i32,
    pub impediments_count: i32,
    pub sprint_start: Option<DateTime<Utc>>,
    pub sprint_end: Option<DateTime<Utc>>,
    pub calculated_at: DateTime<Utc>,
}

/// Insert-or-update request for [`SprintMetrics`].
///
/// On conflict only the completion fields (`completed_points`, `velocity`,
/// `stories_completed`, `sprint_end`) change.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsUpsert {
    pub sprint_id: i64,
    pub project_id: i64,
    pub team_id: Option<i64>,
    pub committed_points: f64,
    pub completed_points: f64,
    pub velocity: f64,
    pub stories_completed: i32,
    pub sprint_start: Option<DateTime<Utc>>,
    pub sprint_end: Option<DateTime<Utc>>,
}

/// One day of a sprint's burndown series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBurndown {
    pub sprint_id: i64,
    pub date: NaiveDate,
    pub remaining_points: f64,
    pub ideal_remaining_points: f64,
    pub completed_points: f64,
    pub added_points: f64,
}

// =============================================================================
// ACTIVITY & NOTIFICATIONS
// =============================================================================

/// Audit trail entry derived from a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: i64,
    pub actor_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub project_id: Option<i64>,
    pub details: JsonValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityLog {
    pub actor_id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub project_id: Option<i64>,
    pub details: JsonValue,
}

/// Notification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    TaskAssigned,
    CommentAdded,
    SprintStarted,
    SprintEnded,
    Mention,
    ImpedimentReported,
    ImpedimentResolved,
    BacklogItemApprovalRequest,
    BacklogItemApproved,
    BacklogItemRejected,
    BacklogItemReadyForSprint,
    ItemMovedToReview,
    ItemReturnedToBacklog,
}

impl NotificationType {
    const ALL: [NotificationType; 13] = [
        NotificationType::TaskAssigned,
        NotificationType::CommentAdded,
        NotificationType::SprintStarted,
        NotificationType::SprintEnded,
        NotificationType::Mention,
        NotificationType::ImpedimentReported,
        NotificationType::ImpedimentResolved,
        NotificationType::BacklogItemApprovalRequest,
        NotificationType::BacklogItemApproved,
        NotificationType::BacklogItemRejected,
        NotificationType::BacklogItemReadyForSprint,
        NotificationType::ItemMovedToReview,
        NotificationType::ItemReturnedToBacklog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TaskAssigned => "TASK_ASSIGNED",
            NotificationType::CommentAdded => "COMMENT_ADDED",
            NotificationType::SprintStarted => "SPRINT_STARTED",
            NotificationType::SprintEnded => "SPRINT_ENDED",
            NotificationType::Mention => "MENTION",
            NotificationType::ImpedimentReported => "IMPEDIMENT_REPORTED",
            NotificationType::ImpedimentResolved => "IMPEDIMENT_RESOLVED",
            NotificationType::BacklogItemApprovalRequest => "BACKLOG_ITEM_APPROVAL_REQUEST",
            NotificationType::BacklogItemApproved => "BACKLOG_ITEM_APPROVED",
            NotificationType::BacklogItemRejected => "BACKLOG_ITEM_REJECTED",
            NotificationType::BacklogItemReadyForSprint => "BACKLOG_ITEM_READY_FOR_SPRINT",
            NotificationType::ItemMovedToReview => "ITEM_MOVED_TO_REVIEW",
            NotificationType::ItemReturnedToBacklog => "ITEM_RETURNED_TO_BACKLOG",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown notification type: {}", s)))
    }
}

/// A stored notification for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub payload: JsonValue,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub notification_type: NotificationType,
    pub payload: JsonValue,
}

// =============================================================================
// LOG INGESTION
// =============================================================================

/// Severity of an ingested log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Info => "INFO",
            LogType::Warn => "WARN",
            LogType::Error => "ERROR",
            LogType::Debug => "DEBUG",
        }
    }
}

impl FromStr for LogType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogType::Info),
            "WARN" => Ok(LogType::Warn),
            "ERROR" => Ok(LogType::Error),
            "DEBUG" => Ok(LogType::Debug),
            other => Err(Error::InvalidInput(format!("unknown log type: {}", other))),
        }
    }
}

/// A persisted log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub url: Option<String>,
    pub correlation_id: Option<String>,
    pub application_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A parsed queue message ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub url: Option<String>,
    pub correlation_id: Option<String>,
    pub application_name: String,
    pub message: String,
}

// =============================================================================
// DEAD LETTERS
// =============================================================================

/// An event a consumer refused, kept for offline inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    pub event_id: Uuid,
    pub consumer_group: String,
    pub topic: String,
    pub action: Option<String>,
    pub payload: JsonValue,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeadLetter {
    pub event_id: Uuid,
    pub consumer_group: String,
    pub topic: String,
    pub action: Option<String>,
    pub payload: JsonValue,
    pub reason: String,
}

// =============================================================================
// OWNING SERVICE
// =============================================================================

/// Sprint as served by the owning Scrum service (`GET /sprints/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintSnapshot {
    pub id: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub committed_points: Option<f64>,
    #[serde(default)]
    pub completed_points: Option<f64>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SprintSnapshot {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .as_deref()
            .and_then(|s| parse_datetime_str(s).ok())
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .as_deref()
            .and_then(|s| parse_datetime_str(s).ok())
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some(crate::events::STATUS_COMPLETED)
    }
}
