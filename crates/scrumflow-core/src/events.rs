//! Event envelope and validated domain events.
//!
//! Producers publish flat JSON objects under a [`Topic`]; the `action` field
//! inside the object selects the handler within that topic. Consumers wrap the
//! raw object in an [`EventEnvelope`] and convert it into a [`DomainEvent`] at
//! the boundary. Conversion fails with a [`ValidationError`] when a field the
//! pipeline depends on is missing or ill-typed; callers dead-letter those
//! events instead of proceeding with holes in the data.
//!
//! ## Wire Format
//!
//! ```text
//! routing key: scrum.sprint
//! body: {"sprintId":42,"projectId":7,"action":"COMPLETED","velocity":30,...}
//! ```
//!
//! Numeric ids accept JSON numbers or numeric strings. Dates accept RFC 3339
//! timestamps or bare `YYYY-MM-DD` days (midnight UTC).

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::NewActivityLog;
use crate::topics::Topic;

/// Field names shared by producers.
pub mod fields {
    pub const ACTION: &str = "action";
    pub const TIMESTAMP: &str = "timestamp";
    pub const PERFORMED_BY: &str = "performedBy";
    pub const PROJECT_ID: &str = "projectId";
    pub const SPRINT_ID: &str = "sprintId";
    pub const TASK_ID: &str = "taskId";
    pub const ITEM_ID: &str = "itemId";
    pub const USER_ID: &str = "userId";
    pub const TEAM_ID: &str = "teamId";
    pub const IMPEDIMENT_ID: &str = "impedimentId";
    pub const ASSIGNEE_ID: &str = "assigneeId";
}

/// Actions the pipeline dispatches on.
pub mod actions {
    pub const COMPLETED: &str = "COMPLETED";
    pub const STARTED: &str = "STARTED";
    pub const STATUS_CHANGED: &str = "STATUS_CHANGED";
    pub const ASSIGNED: &str = "ASSIGNED";
    pub const CREATED: &str = "CREATED";
    pub const RESOLVED: &str = "RESOLVED";
}

/// Sprint status reported by the owning service once a sprint is closed.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Entity id lookup order for activity rows.
const ENTITY_ID_PRIORITY: [&str; 6] = [
    fields::TASK_ID,
    fields::SPRINT_ID,
    fields::ITEM_ID,
    fields::USER_ID,
    fields::TEAM_ID,
    fields::PROJECT_ID,
];

// ============================================================================
// Validation errors
// ============================================================================

/// Why a raw event could not be turned into a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ============================================================================
// Envelope
// ============================================================================

/// A received event: topic, action and the raw payload object.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7 stamped on receipt for log correlation and dead lettering.
    pub event_id: Uuid,
    pub topic: Topic,
    /// `action` field of the payload, if the producer set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// The flat producer object, untouched.
    pub payload: Map<String, Value>,
    /// Producer timestamp when present and parseable, otherwise receipt time.
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap a payload object received on `topic`.
    pub fn new(topic: Topic, payload: Map<String, Value>) -> Self {
        let action = payload
            .get(fields::ACTION)
            .and_then(Value::as_str)
            .map(String::from);
        let timestamp = payload
            .get(fields::TIMESTAMP)
            .and_then(|v| parse_datetime(v).ok())
            .unwrap_or_else(Utc::now);

        Self {
            event_id: Uuid::now_v7(),
            topic,
            action,
            payload,
            timestamp,
        }
    }

    /// Decode a message body received on `topic`.
    pub fn from_slice(topic: Topic, body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self::new(topic, map)),
            _ => Err(ValidationError::NotAnObject),
        }
    }

    /// Encode the payload back into the flat wire object.
    pub fn to_vec(&self) -> Vec<u8> {
        // A Map<String, Value> always serializes.
        serde_json::to_vec(&self.payload).unwrap_or_default()
    }

    /// Whether the payload carries the given action.
    pub fn is_action(&self, action: &str) -> bool {
        self.action.as_deref() == Some(action)
    }

    /// The action, falling back to the topic name.
    pub fn action_or_topic(&self) -> String {
        self.action
            .clone()
            .unwrap_or_else(|| self.topic.as_str().to_string())
    }

    /// Payload as a JSON value (for storage in `details` / dead letters).
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    /// Derive the activity row for this event.
    ///
    /// Returns `None` unless both `performedBy` and `projectId` are present
    /// and some entity id can be resolved.
    pub fn activity(&self) -> Option<NewActivityLog> {
        let actor_id = opt_i64(&self.payload, fields::PERFORMED_BY).ok()??;
        let project_id = opt_i64(&self.payload, fields::PROJECT_ID).ok()??;
        let entity_id = ENTITY_ID_PRIORITY
            .iter()
            .find_map(|key| opt_i64(&self.payload, *key).ok().flatten())?;

        Some(NewActivityLog {
            actor_id,
            action: self.action_or_topic(),
            entity_type: self.topic.entity_type(),
            entity_id,
            project_id: Some(project_id),
            details: self.payload_value(),
        })
    }
}

// ============================================================================
// Domain events
// ============================================================================

/// `scrum.sprint` / `COMPLETED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintCompleted {
    pub sprint_id: i64,
    pub project_id: i64,
    pub team_id: Option<i64>,
    pub sprint_name: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub committed_points: Option<f64>,
    pub completed_points: Option<f64>,
    pub velocity: Option<f64>,
    pub stories_completed: Option<i32>,
    pub backlog_items_remaining: Option<i32>,
    pub performed_by: Option<i64>,
}

impl SprintCompleted {
    /// Velocity to record: explicit velocity, else completed points, else 0.
    pub fn effective_velocity(&self) -> f64 {
        self.velocity.or(self.completed_points).unwrap_or(0.0)
    }

    /// A `COMPLETED` action whose status disagrees is not a closed sprint.
    pub fn is_closed(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |status| status == STATUS_COMPLETED)
    }
}

/// `scrum.sprint` / `STARTED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintStarted {
    pub sprint_id: i64,
    pub project_id: i64,
    pub sprint_name: Option<String>,
    pub sprint_goal: Option<String>,
    pub committed_points: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// `scrum.task` / `STATUS_CHANGED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChanged {
    pub task_id: i64,
    pub sprint_id: Option<i64>,
    pub new_status: Option<String>,
    pub title: Option<String>,
    pub assignee_id: Option<i64>,
}

/// `scrum.task` / `ASSIGNED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssigned {
    pub task_id: i64,
    pub assignee_id: i64,
    pub title: Option<String>,
    pub performed_by: Option<i64>,
}

/// `scrum.impediment` / `CREATED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpedimentCreated {
    pub impediment_id: i64,
    pub project_id: i64,
    pub sprint_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub reported_by: Option<i64>,
    pub assigned_to: Option<i64>,
}

/// `scrum.impediment` / `RESOLVED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpedimentResolved {
    pub impediment_id: i64,
    pub project_id: i64,
    pub title: Option<String>,
    pub resolution: Option<String>,
    pub reported_by: Option<i64>,
    pub resolved_by: Option<i64>,
}

/// A validated event, one variant per (topic, action) pair the pipeline acts on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    SprintCompleted(SprintCompleted),
    SprintStarted(SprintStarted),
    TaskStatusChanged(TaskStatusChanged),
    TaskAssigned(TaskAssigned),
    ImpedimentCreated(ImpedimentCreated),
    ImpedimentResolved(ImpedimentResolved),
    /// Any other (topic, action) pair. Recorded as activity only.
    Other { topic: Topic, action: Option<String> },
}

impl DomainEvent {
    /// Validate an envelope into its typed variant.
    pub fn from_envelope(env: &EventEnvelope) -> Result<Self, ValidationError> {
        let p = &env.payload;
        let action = env.action.as_deref().unwrap_or_default();

        let event = match (env.topic, action) {
            (Topic::ScrumSprint, actions::COMPLETED) => {
                DomainEvent::SprintCompleted(SprintCompleted::from_payload(p)?)
            }
            (Topic::ScrumSprint, actions::STARTED) => DomainEvent::SprintStarted(SprintStarted {
                sprint_id: require_i64(p, fields::SPRINT_ID)?,
                project_id: require_i64(p, fields::PROJECT_ID)?,
                sprint_name: opt_string(p, "sprintName")?,
                sprint_goal: opt_string(p, "sprintGoal")?,
                committed_points: opt_f64(p, "committedPoints")?,
                start_date: opt_datetime(p, "startDate")?,
                end_date: opt_datetime(p, "endDate")?,
            }),
            (Topic::ScrumTask, actions::STATUS_CHANGED) => {
                DomainEvent::TaskStatusChanged(TaskStatusChanged {
                    task_id: require_i64(p, fields::TASK_ID)?,
                    sprint_id: opt_i64(p, fields::SPRINT_ID)?,
                    new_status: opt_string(p, "status")?,
                    title: opt_string(p, "title")?,
                    assignee_id: opt_i64(p, fields::ASSIGNEE_ID)?,
                })
            }
            (Topic::ScrumTask, actions::ASSIGNED) => DomainEvent::TaskAssigned(TaskAssigned {
                task_id: require_i64(p, fields::TASK_ID)?,
                assignee_id: require_i64(p, fields::ASSIGNEE_ID)?,
                title: opt_string(p, "title")?,
                performed_by: opt_i64(p, fields::PERFORMED_BY)?,
            }),
            (Topic::ScrumImpediment, actions::CREATED) => {
                DomainEvent::ImpedimentCreated(ImpedimentCreated {
                    impediment_id: require_i64(p, fields::IMPEDIMENT_ID)?,
                    project_id: require_i64(p, fields::PROJECT_ID)?,
                    sprint_id: opt_i64(p, fields::SPRINT_ID)?,
                    title: opt_string(p, "title")?,
                    description: opt_string(p, "description")?,
                    reported_by: opt_i64(p, "reportedBy")?,
                    assigned_to: opt_i64(p, "assignedTo")?,
                })
            }
            (Topic::ScrumImpediment, actions::RESOLVED) => {
                DomainEvent::ImpedimentResolved(ImpedimentResolved {
                    impediment_id: require_i64(p, fields::IMPEDIMENT_ID)?,
                    project_id: require_i64(p, fields::PROJECT_ID)?,
                    title: opt_string(p, "title")?,
                    resolution: opt_string(p, "resolution")?,
                    reported_by: opt_i64(p, "reportedBy")?,
                    resolved_by: opt_i64(p, "resolvedBy")?,
                })
            }
            (topic, _) => DomainEvent::Other {
                topic,
                action: env.action.clone(),
            },
        };

        Ok(event)
    }

    /// Variant name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::SprintCompleted(_) => "SprintCompleted",
            DomainEvent::SprintStarted(_) => "SprintStarted",
            DomainEvent::TaskStatusChanged(_) => "TaskStatusChanged",
            DomainEvent::TaskAssigned(_) => "TaskAssigned",
            DomainEvent::ImpedimentCreated(_) => "ImpedimentCreated",
            DomainEvent::ImpedimentResolved(_) => "ImpedimentResolved",
            DomainEvent::Other { .. } => "Other",
        }
    }
}

impl SprintCompleted {
    /// Validate a completion payload (also used by the manual ingestion path).
    pub fn from_payload(p: &Map<String, Value>) -> Result<Self, ValidationError> {
        Ok(SprintCompleted {
            sprint_id: require_i64(p, fields::SPRINT_ID)?,
            project_id: require_i64(p, fields::PROJECT_ID)?,
            team_id: opt_i64(p, fields::TEAM_ID)?,
            sprint_name: opt_string(p, "sprintName")?,
            status: opt_string(p, "status")?,
            start_date: opt_datetime(p, "startDate")?,
            end_date: opt_datetime(p, "endDate")?,
            committed_points: opt_f64(p, "committedPoints")?,
            completed_points: opt_f64(p, "completedPoints")?,
            velocity: opt_f64(p, "velocity")?,
            stories_completed: opt_i32(p, "storiesCompleted")?,
            backlog_items_remaining: opt_i32(p, "backlogItemsRemaining")?,
            performed_by: opt_i64(p, fields::PERFORMED_BY)?,
        })
    }
}

// ============================================================================
// Field extraction
// ============================================================================

fn present<'a>(p: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    p.get(key).filter(|v| !v.is_null())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Optional integer field; absent and `null` are `None`.
pub fn opt_i64(p: &Map<String, Value>, key: &'static str) -> Result<Option<i64>, ValidationError> {
    match present(p, key) {
        None => Ok(None),
        Some(v) => value_as_i64(v)
            .map(Some)
            .ok_or_else(|| invalid(key, format!("expected an integer, got {}", v))),
    }
}

/// Required integer field.
pub fn require_i64(p: &Map<String, Value>, key: &'static str) -> Result<i64, ValidationError> {
    opt_i64(p, key)?.ok_or(ValidationError::MissingField(key))
}

fn opt_i32(p: &Map<String, Value>, key: &'static str) -> Result<Option<i32>, ValidationError> {
    match opt_i64(p, key)? {
        None => Ok(None),
        Some(n) => i32::try_from(n)
            .map(Some)
            .map_err(|_| invalid(key, format!("{} is out of range", n))),
    }
}

/// Optional numeric field (integers or decimals).
pub fn opt_f64(p: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, ValidationError> {
    match present(p, key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(key, format!("expected a number, got {:?}", s))),
        Some(v) => Err(invalid(key, format!("expected a number, got {}", v))),
    }
}

/// Optional string field.
pub fn opt_string(
    p: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, ValidationError> {
    match present(p, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v) => Err(invalid(key, format!("expected a string, got {}", v))),
    }
}

/// Optional date/time field.
pub fn opt_datetime(
    p: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match present(p, key) {
        None => Ok(None),
        Some(v) => parse_datetime(v).map(Some).map_err(|reason| invalid(key, reason)),
    }
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` day.
pub fn parse_datetime(v: &Value) -> Result<DateTime<Utc>, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("expected a date string, got {}", v))?;
    parse_datetime_str(s)
}

/// String form of [`parse_datetime`].
pub fn parse_datetime_str(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("unparseable date {:?}", s))
}

// ============================================================================
// Tests
// ============================================================================
