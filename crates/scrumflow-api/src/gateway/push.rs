//! Outbound push through the connection registry.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{trace, warn};

use scrumflow_core::PushSink;

use super::auth::{AuthError, Claims, TokenVerifier};
use super::registry::{ConnectionRegistry, Room};

/// The real-time push gateway.
///
/// Owns the connection registry and the token verifier. Cloning is cheap; all
/// clones share one registry.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<dyn ConnectionRegistry>,
    verifier: Option<TokenVerifier>,
}

impl Gateway {
    /// Without a secret every connection attempt is refused.
    pub fn new(registry: Arc<dyn ConnectionRegistry>, jwt_secret: Option<&str>) -> Self {
        Self {
            registry,
            verifier: jwt_secret.map(TokenVerifier::new),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        match &self.verifier {
            Some(verifier) => verifier.verify(token),
            None => Err(AuthError::BadSignature),
        }
    }

    fn emit_to_room(&self, room: Room, event: &str, data: &JsonValue) {
        let frame = frame(event, data);
        let conns = self.registry.connections_in_room(room);
        trace!(
            subsystem = "gateway",
            room = %room,
            event,
            recipients = conns.len(),
            "Room push"
        );
        for conn in conns {
            self.registry.send(conn, &frame);
        }
    }
}

/// Serialize a server-to-client frame.
pub fn frame(event: &str, data: &JsonValue) -> String {
    json!({ "event": event, "data": data }).to_string()
}

impl PushSink for Gateway {
    fn emit_to_project(&self, project_id: i64, event: &str, data: &JsonValue) {
        self.emit_to_room(Room::Project(project_id), event, data);
    }

    fn emit_to_sprint(&self, sprint_id: i64, event: &str, data: &JsonValue) {
        self.emit_to_room(Room::Sprint(sprint_id), event, data);
    }

    fn emit_to_user(&self, user_id: i64, event: &str, data: &JsonValue) {
        let conns = self.registry.connections_for_user(user_id);
        if conns.is_empty() {
            trace!(subsystem = "gateway", user_id, event, "User offline, push dropped");
            return;
        }
        let frame = frame(event, data);
        for conn in conns {
            if !self.registry.send(conn, &frame) {
                warn!(
                    subsystem = "gateway",
                    user_id,
                    connection_id = %conn,
                    "Connection closed before push"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::InMemoryRegistry;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn gateway() -> (Gateway, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new());
        (Gateway::new(registry.clone(), Some("secret")), registry)
    }

    #[test]
    fn test_room_isolation() {
        let (gateway, registry) = gateway();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        registry.register(a, 1, tx1);
        registry.register(b, 2, tx2);
        registry.join(a, Room::Project(1));
        registry.join(b, Room::Project(2));

        gateway.emit_to_project(1, "sprint.completed", &json!({"sprintId": 42}));

        let got: JsonValue = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        assert_eq!(got["event"], "sprint.completed");
        assert_eq!(got["data"]["sprintId"], 42);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_emit_to_user_reaches_every_connection() {
        let (gateway, registry) = gateway();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(Uuid::now_v7(), 9, tx1);
        registry.register(Uuid::now_v7(), 9, tx2);

        gateway.emit_to_user(9, "notification", &json!({"type": "TASK_ASSIGNED"}));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_emit_to_offline_user_is_noop() {
        let (gateway, _registry) = gateway();
        gateway.emit_to_user(999, "notification", &json!({}));
    }

    #[test]
    fn test_no_secret_refuses_everyone() {
        let gateway = Gateway::new(Arc::new(InMemoryRegistry::new()), None);
        assert!(gateway.authenticate("a.b.c").is_err());
    }
}
