//! WebSocket push gateway tests.
//!
//! Real axum server on an ephemeral port, tokio-tungstenite clients. Covers:
//! - Authentication by query token and bearer header
//! - Missing and invalid tokens closing the socket
//! - Room isolation between projects
//! - Per-user delivery across several connections
//! - Fan-out pushes reaching the right user end to end

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value as JsonValue};
use sha2::Sha256;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use scrumflow_api::gateway::Room;
use scrumflow_api::{app, AppState, ConnectionRegistry, Gateway, InMemoryRegistry};
use scrumflow_bus::{EventBus, InMemoryEventBus, InMemoryLogQueue};
use scrumflow_core::{PushSink, Result, SprintSnapshot, Topic};
use scrumflow_db::Database;
use scrumflow_jobs::{LogDrainConfig, Pipeline, PipelineConfig, SprintSource};

const SECRET: &str = "gateway-test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct NoSprints;

#[async_trait]
impl SprintSource for NoSprints {
    async fn fetch_sprint(&self, _id: i64) -> Result<Option<SprintSnapshot>> {
        Ok(None)
    }

    async fn list_sprints(&self) -> Result<Vec<SprintSnapshot>> {
        Ok(vec![])
    }
}

/// Mint an HS256 token the way the identity service does.
fn sign_token(secret: &str, claims: JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", header, payload).as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, payload, signature)
}

fn token_for(user_id: i64) -> String {
    sign_token(SECRET, json!({"userId": user_id, "projectIds": [1, 2]}))
}

struct TestGateway {
    addr: String,
    gateway: Gateway,
    registry: Arc<InMemoryRegistry>,
    bus: Arc<InMemoryEventBus>,
    db: Database,
}

impl TestGateway {
    async fn start() -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let gateway = Gateway::new(registry.clone(), Some(SECRET));
        let bus = Arc::new(InMemoryEventBus::new());
        let db = Database::in_memory();
        let state = AppState::new(
            db.clone(),
            bus.clone(),
            gateway.clone(),
            Arc::new(NoSprints),
            Arc::new(InMemoryLogQueue::new()),
            LogDrainConfig::default(),
        );
        let router = app(state, vec!["http://localhost:4200".parse().unwrap()]);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr: addr.to_string(),
            gateway,
            registry,
            bus,
            db,
        }
    }

    async fn connect(&self, token: &str) -> Client {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    /// Connect and wait until the registry has seen the user.
    async fn connect_user(&self, user_id: i64) -> Client {
        let before = self.registry.connections_for_user(user_id).len();
        let ws = self.connect(&token_for(user_id)).await;
        self.wait_until(|| self.registry.connections_for_user(user_id).len() > before)
            .await;
        ws
    }

    async fn join(&self, ws: &mut Client, event: &str, id: JsonValue, room: Room) {
        let before = self.registry.connections_in_room(room).len();
        ws.send(Message::Text(json!({"event": event, "data": id}).to_string()))
            .await
            .unwrap();
        self.wait_until(|| self.registry.connections_in_room(room).len() > before)
            .await;
    }

    async fn wait_until(&self, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within timeout");
    }
}

/// Next text frame as JSON, or `None` if nothing arrives in time.
async fn next_frame(ws: &mut Client, wait: Duration) -> Option<JsonValue> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next()).await.ok()??;
        match msg {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// True if the server closes the socket without sending any text frame.
async fn closed_without_payload(ws: &mut Client) -> bool {
    match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => true,
        _ => false,
    }
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_query_token_registers_user() {
    let t = TestGateway::start().await;
    let _ws = t.connect_user(9).await;
    assert_eq!(t.registry.connections_for_user(9).len(), 1);
}

#[tokio::test]
async fn test_bearer_header_registers_user() {
    let t = TestGateway::start().await;
    let mut request = format!("ws://{}/ws", t.addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", token_for(12)).parse().unwrap(),
    );
    let (_ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    t.wait_until(|| t.registry.connections_for_user(12).len() == 1)
        .await;
}

#[tokio::test]
async fn test_missing_token_closes_immediately() {
    let t = TestGateway::start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", t.addr))
        .await
        .unwrap();
    assert!(closed_without_payload(&mut ws).await);
    assert_eq!(t.registry.connection_count(), 0);
}

#[tokio::test]
async fn test_invalid_token_closes_immediately() {
    let t = TestGateway::start().await;

    let mut forged = t.connect(&sign_token("wrong-secret", json!({"userId": 9}))).await;
    assert!(closed_without_payload(&mut forged).await);

    let mut garbage = t.connect("not-a-token").await;
    assert!(closed_without_payload(&mut garbage).await);

    let expired = sign_token(SECRET, json!({"userId": 9, "exp": 1_000_000_000}));
    let mut expired = t.connect(&expired).await;
    assert!(closed_without_payload(&mut expired).await);

    assert_eq!(t.registry.connection_count(), 0);
}

// ============================================================================
// ROOMS AND USERS
// ============================================================================

#[tokio::test]
async fn test_room_isolation() {
    let t = TestGateway::start().await;
    let mut member_1 = t.connect_user(1).await;
    let mut member_2 = t.connect_user(2).await;
    t.join(&mut member_1, "join-project", json!(1), Room::Project(1)).await;
    t.join(&mut member_2, "join-project", json!("2"), Room::Project(2)).await;

    t.gateway
        .emit_to_project(1, "sprint.started", &json!({"sprintId": 5}));

    let frame = next_frame(&mut member_1, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["event"], "sprint.started");
    assert_eq!(frame["data"]["sprintId"], 5);
    assert!(next_frame(&mut member_2, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_leave_room_stops_delivery() {
    let t = TestGateway::start().await;
    let mut ws = t.connect_user(1).await;
    t.join(&mut ws, "join-sprint", json!(42), Room::Sprint(42)).await;

    ws.send(Message::Text(
        json!({"event": "leave-sprint", "data": 42}).to_string(),
    ))
    .await
    .unwrap();
    t.wait_until(|| t.registry.connections_in_room(Room::Sprint(42)).is_empty())
        .await;

    t.gateway
        .emit_to_sprint(42, "task.status.changed", &json!({"taskId": 1}));
    assert!(next_frame(&mut ws, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_user_push_reaches_every_connection() {
    let t = TestGateway::start().await;
    let mut first = t.connect_user(9).await;
    let mut second = t.connect_user(9).await;
    let mut other = t.connect_user(10).await;

    t.gateway
        .emit_to_user(9, "notification", &json!({"type": "MENTION"}));

    for ws in [&mut first, &mut second] {
        let frame = next_frame(ws, Duration::from_secs(2)).await.unwrap();
        assert_eq!(frame["event"], "notification");
    }
    assert!(next_frame(&mut other, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_push_to_offline_user_is_silent() {
    let t = TestGateway::start().await;
    t.gateway.emit_to_user(999, "notification", &json!({}));
    assert_eq!(t.registry.user_count(), 0);
}

#[tokio::test]
async fn test_disconnect_cleans_registry() {
    let t = TestGateway::start().await;
    let mut ws = t.connect_user(5).await;
    t.join(&mut ws, "join-project", json!(3), Room::Project(3)).await;

    ws.close(None).await.unwrap();
    drop(ws);

    t.wait_until(|| t.registry.connection_count() == 0).await;
    assert_eq!(t.registry.user_count(), 0);
    assert_eq!(t.registry.room_count(), 0);
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test]
async fn test_task_assignment_pushes_to_assignee_only() {
    let t = TestGateway::start().await;
    let pipeline = Pipeline::new(
        t.bus.clone(),
        t.db.clone(),
        Arc::new(t.gateway.clone()),
        PipelineConfig::default(),
    )
    .start()
    .await
    .unwrap();

    let mut assignee = t.connect_user(9).await;
    let mut bystander = t.connect_user(10).await;

    t.bus
        .publish_json(
            Topic::ScrumTask,
            &json!({
                "action": "ASSIGNED", "taskId": 55, "assigneeId": 9,
                "title": "Fix login", "performedBy": 101, "projectId": 7
            }),
        )
        .await
        .unwrap();

    let frame = next_frame(&mut assignee, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["event"], "notification");
    assert_eq!(frame["data"]["type"], "TASK_ASSIGNED");
    assert_eq!(
        frame["data"]["message"],
        "You have been assigned to task: Fix login"
    );
    assert!(next_frame(&mut bystander, Duration::from_millis(200)).await.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_sprint_completion_pushes_to_project_room() {
    let t = TestGateway::start().await;
    let pipeline = Pipeline::new(
        t.bus.clone(),
        t.db.clone(),
        Arc::new(t.gateway.clone()),
        PipelineConfig::default(),
    )
    .start()
    .await
    .unwrap();

    let mut member = t.connect_user(1).await;
    t.join(&mut member, "join-project", json!(7), Room::Project(7)).await;

    t.bus
        .publish_json(
            Topic::ScrumSprint,
            &json!({
                "sprintId": 42, "projectId": 7, "teamId": 3,
                "action": "COMPLETED", "status": "COMPLETED",
                "sprintName": "Sprint 12", "velocity": 30, "completedPoints": 30,
                "storiesCompleted": 6, "performedBy": 101
            }),
        )
        .await
        .unwrap();

    let frame = next_frame(&mut member, Duration::from_secs(2)).await.unwrap();
    assert_eq!(frame["event"], "sprint.completed");
    assert_eq!(frame["data"]["sprintId"], 42);
    assert_eq!(frame["data"]["sprintName"], "Sprint 12");

    pipeline.shutdown().await;
}
