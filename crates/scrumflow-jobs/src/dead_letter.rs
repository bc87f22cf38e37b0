//! Dead-letter recording for events a consumer refuses.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{error, warn};
use uuid::Uuid;

use scrumflow_core::{
    DeadLetterRepository, EventEnvelope, NewDeadLetter, Topic, ValidationError,
};

/// Writes refused events to the dead-letter table on behalf of one consumer
/// group.
///
/// Storage failures are logged and swallowed: a dead letter that cannot be
/// stored must not turn into a redelivery loop.
#[derive(Clone)]
pub struct DeadLetterSink {
    repo: Arc<dyn DeadLetterRepository>,
    group: String,
}

impl DeadLetterSink {
    pub fn new(repo: Arc<dyn DeadLetterRepository>, group: impl Into<String>) -> Self {
        Self {
            repo,
            group: group.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Record a decoded envelope that failed typed validation.
    pub async fn envelope(&self, env: &EventEnvelope, reason: &ValidationError) {
        warn!(
            subsystem = "jobs",
            component = "dead_letter",
            consumer_group = %self.group,
            topic = %env.topic,
            action = env.action.as_deref().unwrap_or(""),
            event_id = %env.event_id,
            reason = %reason,
            "Dead-lettering event"
        );
        self.store(NewDeadLetter {
            event_id: env.event_id,
            consumer_group: self.group.clone(),
            topic: env.topic.as_str().to_string(),
            action: env.action.clone(),
            payload: env.payload_value(),
            reason: reason.to_string(),
        })
        .await;
    }

    /// Record a body that never decoded into an envelope.
    pub async fn raw(&self, topic: Topic, body: &[u8], reason: &ValidationError) {
        let event_id = Uuid::now_v7();
        warn!(
            subsystem = "jobs",
            component = "dead_letter",
            consumer_group = %self.group,
            topic = %topic,
            event_id = %event_id,
            reason = %reason,
            "Dead-lettering undecodable message"
        );
        self.store(NewDeadLetter {
            event_id,
            consumer_group: self.group.clone(),
            topic: topic.as_str().to_string(),
            action: None,
            payload: JsonValue::String(String::from_utf8_lossy(body).into_owned()),
            reason: reason.to_string(),
        })
        .await;
    }

    async fn store(&self, letter: NewDeadLetter) {
        let event_id = letter.event_id;
        if let Err(e) = self.repo.insert(letter).await {
            error!(
                subsystem = "jobs",
                component = "dead_letter",
                consumer_group = %self.group,
                event_id = %event_id,
                error = %e,
                "Failed to store dead letter"
            );
        }
    }
}
