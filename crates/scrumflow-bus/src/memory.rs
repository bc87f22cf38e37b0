//! Process-local event bus.
//!
//! Each subscription owns an unbounded queue drained by one task. On publish,
//! every group with at least one subscription to the topic receives the
//! message once; within a group, subscriptions take turns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace};

use scrumflow_core::Topic;

use super::{EventBus, MessageHandler, Result, Subscription};

type Delivery = (Topic, Arc<[u8]>);

struct Member {
    topics: HashSet<Topic>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    cursor: usize,
}

impl Group {
    /// Hand the message to the next live member subscribed to `topic`.
    fn deliver(&mut self, topic: Topic, body: &Arc<[u8]>) -> bool {
        self.members.retain(|m| !m.tx.is_closed());
        let eligible: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.topics.contains(&topic))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return false;
        }
        for attempt in 0..eligible.len() {
            let idx = eligible[(self.cursor + attempt) % eligible.len()];
            if self.members[idx].tx.send((topic, body.clone())).is_ok() {
                self.cursor = self.cursor.wrapping_add(attempt + 1);
                return true;
            }
        }
        false
    }
}

/// In-memory [`EventBus`].
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    groups: Arc<Mutex<HashMap<String, Group>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: Topic, body: &[u8]) -> Result<()> {
        let body: Arc<[u8]> = Arc::from(body);
        let mut groups = self.groups.lock().await;
        let mut delivered = 0usize;
        for group in groups.values_mut() {
            if group.deliver(topic, &body) {
                delivered += 1;
            }
        }
        trace!(subsystem = "bus", topic = %topic, groups = delivered, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[Topic],
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.groups
            .lock()
            .await
            .entry(group.to_string())
            .or_default()
            .members
            .push(Member {
                topics: topics.iter().copied().collect(),
                tx,
            });

        info!(
            subsystem = "bus",
            component = "memory",
            consumer_group = %group,
            topics = topics.len(),
            "Subscribed"
        );

        let group_name = group.to_string();
        let task = tokio::spawn(async move {
            while let Some((topic, body)) = rx.recv().await {
                debug!(consumer_group = %group_name, topic = %topic, "Delivering message");
                if let Err(e) = handler.handle(topic, &body).await {
                    error!(
                        subsystem = "bus",
                        consumer_group = %group_name,
                        topic = %topic,
                        error = %e,
                        "Handler failed"
                    );
                }
            }
        });

        Ok(Subscription::new(group, task))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
