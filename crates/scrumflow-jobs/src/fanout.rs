//! Activity/notification fan-out consumer.
//!
//! Every event with an actor and a project becomes one activity row. A fixed
//! set of (topic, action) pairs additionally creates notifications and pushes
//! to live connections:
//!
//! | topic | action | effect |
//! |-------|--------|--------|
//! | `scrum.task` | `STATUS_CHANGED` | `task.status.changed` to the sprint room |
//! | `scrum.task` | `ASSIGNED` | `TASK_ASSIGNED` notification + push to the assignee |
//! | `scrum.sprint` | `STARTED` | `sprint.started` to the project room |
//! | `scrum.sprint` | `COMPLETED` | `sprint.completed` to the project room |
//! | `scrum.impediment` | `CREATED` | `impediment.created` to the project room, `IMPEDIMENT_REPORTED` for the assignee |
//! | `scrum.impediment` | `RESOLVED` | `IMPEDIMENT_RESOLVED` for the reporter, `impediment.resolved` to the project room |
//!
//! Push bodies copy the producer's fields that are present; absent fields are
//! omitted rather than sent as `null`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, trace};

use scrumflow_bus::MessageHandler;
use scrumflow_core::{
    DomainEvent, EventEnvelope, NewNotification, NotificationType, PushSink, Result, Topic,
};
use scrumflow_db::Database;

use crate::dead_letter::DeadLetterSink;

/// Push event names.
pub mod push_events {
    pub const TASK_STATUS_CHANGED: &str = "task.status.changed";
    pub const SPRINT_STARTED: &str = "sprint.started";
    pub const SPRINT_COMPLETED: &str = "sprint.completed";
    pub const IMPEDIMENT_CREATED: &str = "impediment.created";
    pub const IMPEDIMENT_RESOLVED: &str = "impediment.resolved";
    pub const NOTIFICATION: &str = "notification";
}

/// What one message produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    /// Typed variant the message validated into, empty when it did not.
    pub kind: &'static str,
    pub activity_recorded: bool,
    pub notifications: usize,
    pub pushes: usize,
    pub dead_lettered: bool,
}

/// Records activity and delivers notifications for every domain event.
#[derive(Clone)]
pub struct FanOut {
    db: Database,
    push: Arc<dyn PushSink>,
    dead_letters: DeadLetterSink,
}

impl FanOut {
    pub fn new(db: Database, push: Arc<dyn PushSink>, dead_letters: DeadLetterSink) -> Self {
        Self {
            db,
            push,
            dead_letters,
        }
    }

    /// Process one bus message.
    pub async fn process(&self, topic: Topic, body: &[u8]) -> Result<FanOutReport> {
        let mut report = FanOutReport::default();

        let env = match EventEnvelope::from_slice(topic, body) {
            Ok(env) => env,
            Err(e) => {
                self.dead_letters.raw(topic, body, &e).await;
                report.dead_lettered = true;
                return Ok(report);
            }
        };

        trace!(
            subsystem = "jobs",
            component = "fanout",
            event_id = %env.event_id,
            topic = %topic,
            payload = %env.payload_value(),
            "Received event"
        );

        if let Some(entry) = env.activity() {
            self.db.activity.insert(entry).await?;
            report.activity_recorded = true;
        }

        let event = match DomainEvent::from_envelope(&env) {
            Ok(event) => event,
            Err(e) => {
                self.dead_letters.envelope(&env, &e).await;
                report.dead_lettered = true;
                return Ok(report);
            }
        };
        report.kind = event.kind();

        self.dispatch(&env, &event, &mut report).await?;

        debug!(
            subsystem = "jobs",
            component = "fanout",
            event_id = %env.event_id,
            kind = report.kind,
            activity = report.activity_recorded,
            notifications = report.notifications,
            pushes = report.pushes,
            "Event fanned out"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        env: &EventEnvelope,
        event: &DomainEvent,
        report: &mut FanOutReport,
    ) -> Result<()> {
        let p = &env.payload;
        match event {
            DomainEvent::TaskStatusChanged(e) => {
                if let Some(sprint_id) = e.sprint_id {
                    let data = pick(
                        p,
                        &[
                            ("taskId", "taskId"),
                            ("newStatus", "status"),
                            ("title", "title"),
                            ("assigneeId", "assigneeId"),
                        ],
                    );
                    self.push
                        .emit_to_sprint(sprint_id, push_events::TASK_STATUS_CHANGED, &data);
                    report.pushes += 1;
                }
            }
            DomainEvent::TaskAssigned(e) => {
                let payload = pick(
                    p,
                    &[
                        ("taskId", "taskId"),
                        ("taskTitle", "title"),
                        ("assignedBy", "performedBy"),
                    ],
                );
                self.notify(
                    e.assignee_id,
                    NotificationType::TaskAssigned,
                    payload,
                    format!("You have been assigned to task: {}", title(&e.title)),
                    report,
                )
                .await?;
            }
            DomainEvent::SprintStarted(e) => {
                let data = pick(
                    p,
                    &[
                        ("sprintId", "sprintId"),
                        ("sprintName", "sprintName"),
                        ("sprintGoal", "sprintGoal"),
                        ("committedPoints", "committedPoints"),
                        ("startDate", "startDate"),
                        ("endDate", "endDate"),
                    ],
                );
                self.push
                    .emit_to_project(e.project_id, push_events::SPRINT_STARTED, &data);
                report.pushes += 1;
            }
            DomainEvent::SprintCompleted(e) => {
                let data = pick(
                    p,
                    &[
                        ("sprintId", "sprintId"),
                        ("sprintName", "sprintName"),
                        ("completedPoints", "completedPoints"),
                        ("velocity", "velocity"),
                        ("storiesCompleted", "storiesCompleted"),
                    ],
                );
                self.push
                    .emit_to_project(e.project_id, push_events::SPRINT_COMPLETED, &data);
                report.pushes += 1;
            }
            DomainEvent::ImpedimentCreated(e) => {
                let data = pick(
                    p,
                    &[
                        ("impedimentId", "impedimentId"),
                        ("title", "title"),
                        ("description", "description"),
                        ("reportedBy", "reportedBy"),
                        ("sprintId", "sprintId"),
                    ],
                );
                self.push
                    .emit_to_project(e.project_id, push_events::IMPEDIMENT_CREATED, &data);
                report.pushes += 1;

                if let Some(assignee) = e.assigned_to {
                    let message = format!("New impediment reported: {}", title(&e.title));
                    let mut payload = pick(
                        p,
                        &[
                            ("impedimentId", "impedimentId"),
                            ("title", "title"),
                            ("description", "description"),
                            ("reportedBy", "reportedBy"),
                        ],
                    );
                    payload["message"] = JsonValue::String(message.clone());
                    self.notify(
                        assignee,
                        NotificationType::ImpedimentReported,
                        payload,
                        message,
                        report,
                    )
                    .await?;
                }
            }
            DomainEvent::ImpedimentResolved(e) => {
                if let Some(reporter) = e.reported_by {
                    let mut payload = pick(
                        p,
                        &[
                            ("impedimentId", "impedimentId"),
                            ("title", "title"),
                            ("resolution", "resolution"),
                            ("resolvedBy", "resolvedBy"),
                        ],
                    );
                    payload["message"] =
                        JsonValue::String(format!("Impediment resolved: {}", title(&e.title)));
                    self.notify(
                        reporter,
                        NotificationType::ImpedimentResolved,
                        payload,
                        format!("Your impediment has been resolved: {}", title(&e.title)),
                        report,
                    )
                    .await?;
                }

                let data = pick(
                    p,
                    &[
                        ("impedimentId", "impedimentId"),
                        ("title", "title"),
                        ("resolution", "resolution"),
                        ("resolvedBy", "resolvedBy"),
                    ],
                );
                self.push
                    .emit_to_project(e.project_id, push_events::IMPEDIMENT_RESOLVED, &data);
                report.pushes += 1;
            }
            DomainEvent::Other { .. } => {}
        }
        Ok(())
    }

    /// Store a notification and push its summary to the recipient.
    async fn notify(
        &self,
        user_id: i64,
        notification_type: NotificationType,
        payload: JsonValue,
        message: String,
        report: &mut FanOutReport,
    ) -> Result<()> {
        self.db
            .notifications
            .create(NewNotification {
                recipient_id: user_id,
                notification_type,
                payload,
            })
            .await?;
        report.notifications += 1;

        self.push.emit_to_user(
            user_id,
            push_events::NOTIFICATION,
            &json!({ "type": notification_type.as_str(), "message": message }),
        );
        report.pushes += 1;
        Ok(())
    }
}

/// Copy `(out, in)` fields from the producer payload, skipping absent ones.
fn pick(payload: &Map<String, JsonValue>, keys: &[(&str, &str)]) -> JsonValue {
    let mut out = Map::new();
    for (to, from) in keys {
        if let Some(v) = payload.get(*from).filter(|v| !v.is_null()) {
            out.insert((*to).to_string(), v.clone());
        }
    }
    JsonValue::Object(out)
}

fn title(t: &Option<String>) -> &str {
    t.as_deref().unwrap_or_default()
}

#[async_trait]
impl MessageHandler for FanOut {
    async fn handle(&self, topic: Topic, body: &[u8]) -> Result<()> {
        self.process(topic, body).await.map(|_| ())
    }
}
