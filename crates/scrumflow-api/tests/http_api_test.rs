//! HTTP endpoint tests over in-memory state.
//!
//! Each test binds the real router to an ephemeral port and talks to it with
//! reqwest. The owning Scrum service is replaced by a fixed sprint source
//! that knows sprint 1 and answers 503 for sprint 503.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use scrumflow_api::{app, AppState, Gateway, InMemoryRegistry};
use scrumflow_bus::{InMemoryEventBus, InMemoryLogQueue, LogQueue};
use scrumflow_core::{Error, NewNotification, NotificationType, Result, SprintSnapshot};
use scrumflow_db::Database;
use scrumflow_jobs::{LogDrainConfig, SprintSource};

struct FixedSprints;

fn snapshot(id: i64) -> SprintSnapshot {
    SprintSnapshot {
        id,
        project_id: Some(7),
        team_id: Some(3),
        name: Some(format!("Sprint {}", id)),
        start_date: Some("2024-03-01".into()),
        end_date: Some("2024-03-11".into()),
        committed_points: Some(20.0),
        completed_points: Some(20.0),
        velocity: None,
        status: Some("COMPLETED".into()),
    }
}

#[async_trait]
impl SprintSource for FixedSprints {
    async fn fetch_sprint(&self, id: i64) -> Result<Option<SprintSnapshot>> {
        match id {
            1 => Ok(Some(snapshot(1))),
            503 => Err(Error::Request("GET /sprints/503 returned 503 Service Unavailable".into())),
            _ => Ok(None),
        }
    }

    async fn list_sprints(&self) -> Result<Vec<SprintSnapshot>> {
        Ok(vec![snapshot(1)])
    }
}

struct TestServer {
    base: String,
    db: Database,
    queue: InMemoryLogQueue,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let db = Database::in_memory();
        let queue = InMemoryLogQueue::new();
        let state = AppState::new(
            db.clone(),
            Arc::new(InMemoryEventBus::new()),
            Gateway::new(Arc::new(InMemoryRegistry::new()), Some("test-secret")),
            Arc::new(FixedSprints),
            Arc::new(queue.clone()),
            LogDrainConfig::default(),
        );
        let router = app(state, vec!["http://localhost:4200".parse().unwrap()]);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            db,
            queue,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, JsonValue) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
        let mut req = self.client.post(self.url(path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

fn completion_body() -> JsonValue {
    json!({
        "sprintId": 42, "projectId": 7, "teamId": 3,
        "sprintName": "Sprint 12", "endDate": "2024-03-14T17:00:00Z",
        "completedPoints": 30, "velocity": 30, "storiesCompleted": 6,
        "backlogItemsRemaining": 4
    })
}

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn test_health_reports_backends() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["bus"], "memory");
    assert_eq!(body["drainMode"], "batch");
    assert_eq!(body["logCount"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_request_id_header_is_set() {
    let server = TestServer::start().await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(uuid::Uuid::parse_str(id).unwrap().get_version_num(), 7);
}

// ============================================================================
// SYNC
// ============================================================================

#[tokio::test]
async fn test_sprint_completion_then_reports() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/sync/sprint-completion", Some(completion_body()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Sprint metrics recorded successfully");
    assert_eq!(body["sprintId"], 42);
    assert_eq!(body["velocity"], 30.0);

    let (_, velocity) = server.get("/velocity/team/3").await;
    assert_eq!(velocity.as_array().unwrap().len(), 1);
    assert_eq!(velocity[0]["velocity"], 30.0);

    let (_, average) = server.get("/velocity/team/3/average?sprints=3").await;
    assert_eq!(average["averageVelocity"], 30.0);

    let (_, burndown) = server.get("/burndown/project/7").await;
    assert_eq!(burndown[0]["sprintNumber"], 1);
    assert_eq!(burndown[0]["backlogItemsRemaining"], 4);

    let (status, metrics) = server.get("/sprint-metrics/sprint/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["storiesCompleted"], 6);

    let (_, project_metrics) = server.get("/sprint-metrics/project/7").await;
    assert_eq!(project_metrics.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sprint_completion_requires_ids() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("/sync/sprint-completion", Some(json!({"projectId": 7})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid sprint completion payload");
    assert!(body["details"].as_str().unwrap().contains("sprintId"));
}

#[tokio::test]
async fn test_completion_malformed_json_is_400_with_details() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/sync/sprint-completion"))
        .header("content-type", "application/json")
        .body("{\"sprintId\": 42,")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: JsonValue = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid JSON body");
    assert!(!body["details"].as_str().unwrap().is_empty());

    // A JSON array is well-formed but not a completion object.
    let (status, body) = server
        .post("/sync/sprint-completion", Some(json!([42, 7])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid JSON body");
    assert!(body["details"].is_string());

    // Nothing was recorded.
    let (status, _) = server.get("/sprint-metrics/sprint/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_metrics_is_404() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/sprint-metrics/sprint/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_average_rejects_zero_sprints() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/velocity/team/3/average?sprints=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid sprints parameter");
    assert!(body["details"].as_str().unwrap().contains("at least 1"));
}

#[tokio::test]
async fn test_sync_sprint_and_not_found() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/sync/sprint/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully synced data for sprint 1");

    let (_, rows) = server.get("/burndown/sprint/1").await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0]["remainingPoints"], 20.0);
    assert_eq!(rows[10]["remainingPoints"], 0.0);

    let (status, body) = server.post("/sync/sprint/99", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Sprint 99 not found");
}

#[tokio::test]
async fn test_sync_sprint_upstream_failure_is_500() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/sync/sprint/503", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to sync sprint 503");
    assert!(body["details"].as_str().unwrap().contains("503"));

    let (_, rows) = server.get("/burndown/sprint/503").await;
    assert_eq!(rows.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_sync_all() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/sync/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synced"], 1);
    assert_eq!(body["message"], "Successfully synced 1 sprints");
}

// ============================================================================
// LOGS
// ============================================================================

#[tokio::test]
async fn test_download_empty_queue() {
    let server = TestServer::start().await;
    let (status, body) = server.post("/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No logs found in RabbitMQ queue");
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_log_lifecycle() {
    let server = TestServer::start().await;
    for (ts, msg) in [("2024-03-01T10:00:00Z", "first"), ("2024-03-02T10:00:00Z", "second")] {
        let line = json!({
            "timestamp": ts, "logType": "INFO",
            "applicationName": "scrum-core", "message": msg
        });
        server.queue.publish(line.to_string().as_bytes()).await.unwrap();
    }
    server.queue.publish(b"not json").await.unwrap();

    let (status, body) = server.post("/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logs downloaded and stored successfully");
    assert_eq!(body["count"], 2);
    assert_eq!(body["rejected"], 1);

    let (status, body) = server.get("/logs/2024-03-01/2024-03-01T23:59:59").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dateFrom"], "2024-03-01T00:00:00.000Z");
    assert_eq!(body["count"], 1);
    assert_eq!(body["logs"][0]["message"], "first");

    let resp = server.client.delete(server.url("/logs")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: JsonValue = resp.json().await.unwrap();
    assert_eq!(body["message"], "All logs deleted successfully");
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_log_range_validation() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/logs/yesterday/2024-03-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Invalid date format. Use YYYY-MM-DD or YYYY-MM-DDTHH:mm:ss"
    );

    let (status, body) = server.get("/logs/2024-03-02/2024-03-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "dateFrom must be before dateTo");
    assert!(body["details"].is_string());
}

// ============================================================================
// NOTIFICATIONS, ACTIVITY, DEAD LETTERS
// ============================================================================

#[tokio::test]
async fn test_notification_inbox() {
    let server = TestServer::start().await;
    let mut ids = Vec::new();
    for task_id in [1, 2] {
        let n = server
            .db
            .notifications
            .create(NewNotification {
                recipient_id: 9,
                notification_type: NotificationType::TaskAssigned,
                payload: json!({"taskId": task_id}),
            })
            .await
            .unwrap();
        ids.push(n.id);
    }

    let (_, list) = server.get("/notifications/user/9").await;
    assert_eq!(list.as_array().unwrap().len(), 2);
    assert_eq!(list[0]["type"], "TASK_ASSIGNED");

    let (_, count) = server.get("/notifications/user/9/unread-count").await;
    assert_eq!(count["count"], 2);

    let resp = server
        .client
        .patch(server.url(&format!("/notifications/{}/read", ids[0])))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let marked: JsonValue = resp.json().await.unwrap();
    assert_eq!(marked["read"], true);
    assert!(marked["readAt"].is_string());

    let resp = server
        .client
        .patch(server.url("/notifications/9999/read"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .client
        .patch(server.url("/notifications/user/9/read-all"))
        .send()
        .await
        .unwrap();
    let body: JsonValue = resp.json().await.unwrap();
    assert_eq!(body["updated"], 1);

    let (_, count) = server.get("/notifications/user/9/unread-count").await;
    assert_eq!(count["count"], 0);
}

#[tokio::test]
async fn test_empty_activity_and_dead_letters() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/activity/project/7?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = server.get("/activity/user/101").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = server.get("/dead-letters").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}
