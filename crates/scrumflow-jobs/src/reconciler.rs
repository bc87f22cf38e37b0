//! Sprint completion reconciler.
//!
//! Consumes `scrum.sprint` events and, for completed sprints, upserts the three
//! per-sprint aggregates: team velocity, project burndown and sprint metrics.
//! Each upsert is its own step; a failing step is logged and recorded in the
//! [`ReconcileReport`] without stopping the others.

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use scrumflow_bus::MessageHandler;
use scrumflow_core::events::actions;
use scrumflow_core::{
    BurndownUpsert, EventEnvelope, MetricsUpsert, Result, SprintCompleted, Topic, VelocityUpsert,
};
use scrumflow_db::Database;

use crate::dead_letter::DeadLetterSink;

/// Result of one reconcile step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    Applied,
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Per-step outcome of reconciling one completed sprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub sprint_id: i64,
    /// Velocity written to the velocity and metrics rows.
    pub velocity: f64,
    pub velocity_step: StepOutcome,
    pub burndown_step: StepOutcome,
    pub metrics_step: StepOutcome,
}

impl ReconcileReport {
    /// True when no step failed. Skipped steps count as success.
    pub fn is_success(&self) -> bool {
        !(self.velocity_step.is_failed()
            || self.burndown_step.is_failed()
            || self.metrics_step.is_failed())
    }
}

/// Upserts aggregates for completed sprints.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    dead_letters: DeadLetterSink,
}

impl Reconciler {
    pub fn new(db: Database, dead_letters: DeadLetterSink) -> Self {
        Self { db, dead_letters }
    }

    /// Decode and reconcile one bus message.
    ///
    /// Returns `Ok(None)` for messages that are not a closed sprint, including
    /// ones that were dead-lettered.
    pub async fn process(&self, topic: Topic, body: &[u8]) -> Result<Option<ReconcileReport>> {
        if topic != Topic::ScrumSprint {
            debug!(subsystem = "jobs", component = "reconciler", topic = %topic, "Ignoring topic");
            return Ok(None);
        }

        let env = match EventEnvelope::from_slice(topic, body) {
            Ok(env) => env,
            Err(e) => {
                self.dead_letters.raw(topic, body, &e).await;
                return Ok(None);
            }
        };

        if !env.is_action(actions::COMPLETED) {
            debug!(
                subsystem = "jobs",
                component = "reconciler",
                event_id = %env.event_id,
                action = env.action.as_deref().unwrap_or(""),
                "Ignoring sprint action"
            );
            return Ok(None);
        }

        let event = match SprintCompleted::from_payload(&env.payload) {
            Ok(event) => event,
            Err(e) => {
                self.dead_letters.envelope(&env, &e).await;
                return Ok(None);
            }
        };

        if !event.is_closed() {
            debug!(
                subsystem = "jobs",
                component = "reconciler",
                sprint_id = event.sprint_id,
                status = event.status.as_deref().unwrap_or(""),
                "Completion event with non-completed status, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(self.reconcile(&event).await))
    }

    /// Apply the three upserts for a completed sprint.
    pub async fn reconcile(&self, event: &SprintCompleted) -> ReconcileReport {
        let start = Instant::now();
        let velocity = event.effective_velocity();

        let velocity_step = self.upsert_velocity(event, velocity).await;
        let burndown_step = self.upsert_burndown(event).await;
        let metrics_step = self.upsert_metrics(event, velocity).await;

        let report = ReconcileReport {
            sprint_id: event.sprint_id,
            velocity,
            velocity_step,
            burndown_step,
            metrics_step,
        };

        info!(
            subsystem = "jobs",
            component = "reconciler",
            op = "reconcile",
            sprint_id = event.sprint_id,
            project_id = event.project_id,
            velocity,
            success = report.is_success(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sprint reconciled"
        );

        report
    }

    async fn upsert_velocity(&self, event: &SprintCompleted, velocity: f64) -> StepOutcome {
        let Some(team_id) = event.team_id else {
            warn!(
                subsystem = "jobs",
                component = "reconciler",
                sprint_id = event.sprint_id,
                "Completion event has no teamId, skipping velocity"
            );
            return StepOutcome::Skipped("missing teamId".into());
        };

        let req = VelocityUpsert {
            team_id,
            sprint_id: event.sprint_id,
            sprint_name: event.sprint_name.clone(),
            velocity,
            sprint_end_date: event.end_date,
        };
        step_result(
            "upsert_velocity",
            event.sprint_id,
            self.db.velocity.upsert(req).await.map(|_| ()),
        )
    }

    async fn upsert_burndown(&self, event: &SprintCompleted) -> StepOutcome {
        let req = BurndownUpsert {
            project_id: event.project_id,
            sprint_id: event.sprint_id,
            sprint_name: event.sprint_name.clone(),
            backlog_items_remaining: event.backlog_items_remaining.unwrap_or(0),
            items_completed_in_sprint: event.stories_completed.unwrap_or(0),
            completed_points: event.completed_points.unwrap_or(0.0),
            sprint_end_date: event.end_date,
        };
        step_result(
            "upsert_burndown",
            event.sprint_id,
            self.db.burndown.upsert(req).await.map(|_| ()),
        )
    }

    async fn upsert_metrics(&self, event: &SprintCompleted, velocity: f64) -> StepOutcome {
        let req = MetricsUpsert {
            sprint_id: event.sprint_id,
            project_id: event.project_id,
            team_id: event.team_id,
            committed_points: event.committed_points.unwrap_or(0.0),
            completed_points: event.completed_points.unwrap_or(0.0),
            velocity,
            stories_completed: event.stories_completed.unwrap_or(0),
            sprint_start: event.start_date,
            sprint_end: event.end_date,
        };
        step_result(
            "upsert_metrics",
            event.sprint_id,
            self.db.metrics.upsert(req).await.map(|_| ()),
        )
    }
}

fn step_result(op: &'static str, sprint_id: i64, result: Result<()>) -> StepOutcome {
    match result {
        Ok(()) => {
            debug!(subsystem = "jobs", component = "reconciler", op, sprint_id, "Step applied");
            StepOutcome::Applied
        }
        Err(e) => {
            error!(
                subsystem = "jobs",
                component = "reconciler",
                op,
                sprint_id,
                error = %e,
                "Step failed"
            );
            StepOutcome::Failed(e.to_string())
        }
    }
}

#[async_trait]
impl MessageHandler for Reconciler {
    async fn handle(&self, topic: Topic, body: &[u8]) -> Result<()> {
        self.process(topic, body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scrumflow_core::{Error, TeamVelocity, VelocityRepository};
    use scrumflow_db::MemoryStore;
    use serde_json::json;

    const COMPLETED: &str = r#"{
        "sprintId": 42, "projectId": 7, "teamId": 3, "action": "COMPLETED",
        "status": "COMPLETED", "sprintName": "Sprint 12", "velocity": 30,
        "completedPoints": 28, "committedPoints": 32, "storiesCompleted": 6,
        "backlogItemsRemaining": 4, "startDate": "2024-03-01",
        "endDate": "2024-03-14T17:00:00Z", "performedBy": 101
    }"#;

    fn reconciler(store: &Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(
            Database::from_store(store.clone()),
            DeadLetterSink::new(store.clone(), "reporting-service-group"),
        )
    }

    #[tokio::test]
    async fn test_completed_sprint_upserts_all_aggregates() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);

        let report = r
            .process(Topic::ScrumSprint, COMPLETED.as_bytes())
            .await
            .unwrap()
            .expect("report");
        assert!(report.is_success());
        assert_eq!(report.velocity, 30.0);

        let db = Database::from_store(store.clone());
        let v = db.velocity.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(v.team_id, 3);
        assert_eq!(v.velocity, 30.0);
        assert_eq!(v.sprint_name.as_deref(), Some("Sprint 12"));

        let b = db.burndown.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(b.sprint_number, 1);
        assert_eq!(b.backlog_items_remaining, 4);
        assert_eq!(b.items_completed_in_sprint, 6);
        assert_eq!(b.completed_points, 28.0);

        let m = db.metrics.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(m.velocity, 30.0);
        assert_eq!(m.stories_completed, 6);
        assert_eq!(m.committed_points, 32.0);
        assert!(m.sprint_start.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_converges() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);

        r.process(Topic::ScrumSprint, COMPLETED.as_bytes()).await.unwrap();
        r.process(Topic::ScrumSprint, COMPLETED.as_bytes()).await.unwrap();

        let db = Database::from_store(store);
        assert_eq!(db.velocity.list_by_team(3).await.unwrap().len(), 1);
        assert_eq!(db.burndown.list_by_project(7).await.unwrap().len(), 1);
        assert_eq!(db.metrics.list_by_project(7).await.unwrap().len(), 1);
        let b = db.burndown.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(b.sprint_number, 1);
    }

    #[tokio::test]
    async fn test_redelivery_with_new_figures_overwrites_aggregates() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        r.process(Topic::ScrumSprint, COMPLETED.as_bytes()).await.unwrap();

        let mut corrected: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(COMPLETED).unwrap();
        corrected.insert("velocity".into(), json!(35));
        corrected.insert("storiesCompleted".into(), json!(7));
        corrected.insert("backlogItemsRemaining".into(), json!(2));
        let report = r.reconcile(&SprintCompleted::from_payload(&corrected).unwrap()).await;
        assert!(report.is_success());
        assert_eq!(report.velocity, 35.0);

        let db = Database::from_store(store);
        let v = db.velocity.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(v.velocity, 35.0);
        assert_eq!(db.velocity.list_by_team(3).await.unwrap().len(), 1);

        let b = db.burndown.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(b.backlog_items_remaining, 2);
        assert_eq!(b.items_completed_in_sprint, 7);
        assert_eq!(b.sprint_number, 1);

        let m = db.metrics.get_by_sprint(42).await.unwrap().unwrap();
        assert_eq!(m.velocity, 35.0);
        assert_eq!(m.stories_completed, 7);
        assert_eq!(db.metrics.list_by_project(7).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_velocity_falls_back_to_completed_points() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let body = json!({
            "sprintId": 1, "projectId": 7, "teamId": 3,
            "action": "COMPLETED", "completedPoints": 21
        });

        let report = r
            .process(Topic::ScrumSprint, &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.velocity, 21.0);

        let body = json!({"sprintId": 2, "projectId": 7, "teamId": 3, "action": "COMPLETED"});
        let report = r
            .process(Topic::ScrumSprint, &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.velocity, 0.0);
    }

    #[tokio::test]
    async fn test_missing_team_skips_velocity_only() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);
        let body = json!({"sprintId": 5, "projectId": 7, "action": "COMPLETED", "velocity": 10});

        let report = r
            .process(Topic::ScrumSprint, &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.velocity_step, StepOutcome::Skipped(_)));
        assert_eq!(report.burndown_step, StepOutcome::Applied);
        assert_eq!(report.metrics_step, StepOutcome::Applied);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_other_actions_and_statuses_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);

        let started = br#"{"sprintId": 1, "projectId": 7, "action": "STARTED"}"#;
        assert!(r.process(Topic::ScrumSprint, started).await.unwrap().is_none());

        let reopened =
            br#"{"sprintId": 1, "projectId": 7, "action": "COMPLETED", "status": "ACTIVE"}"#;
        assert!(r.process(Topic::ScrumSprint, reopened).await.unwrap().is_none());

        let db = Database::from_store(store.clone());
        assert!(db.burndown.get_by_sprint(1).await.unwrap().is_none());
        assert!(db.dead_letters.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_event_is_dead_lettered() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(&store);

        let no_project = br#"{"sprintId": 9, "action": "COMPLETED"}"#;
        assert!(r.process(Topic::ScrumSprint, no_project).await.unwrap().is_none());
        assert!(r.process(Topic::ScrumSprint, b"{oops").await.unwrap().is_none());

        let db = Database::from_store(store);
        let letters = db.dead_letters.list_recent(10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert!(letters
            .iter()
            .all(|l| l.consumer_group == "reporting-service-group"));
        assert!(db.burndown.get_by_sprint(9).await.unwrap().is_none());
    }

    struct BrokenVelocity;

    #[async_trait]
    impl VelocityRepository for BrokenVelocity {
        async fn upsert(&self, _req: VelocityUpsert) -> Result<TeamVelocity> {
            Err(Error::Internal("velocity table unavailable".into()))
        }
        async fn get_by_sprint(&self, _sprint_id: i64) -> Result<Option<TeamVelocity>> {
            Ok(None)
        }
        async fn list_by_team(&self, _team_id: i64) -> Result<Vec<TeamVelocity>> {
            Ok(vec![])
        }
        async fn recent_by_team(&self, _team_id: i64, _limit: i64) -> Result<Vec<TeamVelocity>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_failed_step_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        let mut db = Database::from_store(store.clone());
        db.velocity = Arc::new(BrokenVelocity);
        let r = Reconciler::new(db.clone(), DeadLetterSink::new(store, "g"));

        let report = r
            .process(Topic::ScrumSprint, COMPLETED.as_bytes())
            .await
            .unwrap()
            .unwrap();
        assert!(report.velocity_step.is_failed());
        assert!(!report.is_success());
        assert!(db.burndown.get_by_sprint(42).await.unwrap().is_some());
        assert!(db.metrics.get_by_sprint(42).await.unwrap().is_some());
    }
}
