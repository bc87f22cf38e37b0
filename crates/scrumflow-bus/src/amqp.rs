//! AMQP (RabbitMQ) event bus.
//!
//! Events go to one durable topic exchange with the topic name as routing
//! key. Each consumer group owns a durable queue named after the group and
//! bound once per subscribed topic, so groups see every message and members
//! of one group compete for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scrumflow_core::{defaults, Topic};

use super::{BusError, EventBus, MessageHandler, Result, Subscription};

/// Configuration for the AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Topic exchange events are published to.
    pub exchange: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: defaults::AMQP_URL.to_string(),
            exchange: defaults::BUS_EXCHANGE.to_string(),
            pool_size: defaults::AMQP_POOL_SIZE,
        }
    }
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

pub(crate) fn build_pool(url: &str, max_size: usize) -> Result<Pool> {
    let manager = Manager::new(url.to_string(), Default::default());
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))
}

pub(crate) async fn open_channel(pool: &Pool) -> Result<Channel> {
    let conn = pool.get().await.map_err(|e: PoolError| {
        BusError::Connection(format!("Failed to get connection from pool: {}", e))
    })?;
    conn.create_channel()
        .await
        .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
}

pub(crate) async fn declare_topic_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {}", e)))
}

/// RabbitMQ-backed [`EventBus`].
pub struct AmqpEventBus {
    pool: Pool,
    config: AmqpConfig,
}

impl AmqpEventBus {
    /// Connect and declare the exchange.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let pool = build_pool(&config.url, config.pool_size)?;
        let channel = open_channel(&pool).await?;
        declare_topic_exchange(&channel, &config.exchange).await?;

        info!(
            subsystem = "bus",
            component = "amqp",
            exchange = %config.exchange,
            "Connected to AMQP"
        );

        Ok(Self { pool, config })
    }

    /// Consumer loop with reconnection and exponential backoff with jitter.
    async fn consume_with_reconnect(
        pool: Pool,
        exchange: String,
        group: String,
        topics: Vec<Topic>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let backoff_builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter();
        let mut backoff_iter = backoff_builder.build();

        loop {
            match Self::setup_consumer(&pool, &exchange, &group, &topics).await {
                Ok(mut consumer) => {
                    info!(
                        subsystem = "bus",
                        consumer_group = %group,
                        "Consumer connected, processing messages"
                    );
                    backoff_iter = backoff_builder.build();

                    while let Some(delivery) = consumer.next().await {
                        match delivery {
                            Ok(delivery) => {
                                Self::process_delivery(&group, delivery, handler.as_ref()).await
                            }
                            Err(e) => {
                                error!(
                                    consumer_group = %group,
                                    error = %e,
                                    "Consumer delivery error, will reconnect"
                                );
                                break;
                            }
                        }
                    }

                    warn!(consumer_group = %group, "Consumer stream ended, reconnecting");
                }
                Err(e) => {
                    let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
                    error!(
                        consumer_group = %group,
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "Failed to set up consumer, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }
    }

    /// Declare the group queue, bind it once per topic, and start consuming.
    async fn setup_consumer(
        pool: &Pool,
        exchange: &str,
        group: &str,
        topics: &[Topic],
    ) -> Result<lapin::Consumer> {
        let channel = open_channel(pool).await?;

        channel
            .queue_declare(
                group,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        for topic in topics {
            channel
                .queue_bind(
                    group,
                    exchange,
                    topic.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {}", e)))?;
        }

        debug!(
            consumer_group = %group,
            topics = topics.len(),
            "Bound group queue to exchange"
        );

        let tag = format!("{}-{}", group, Uuid::new_v4().simple());
        channel
            .basic_consume(
                group,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
    }

    async fn process_delivery(
        group: &str,
        delivery: lapin::message::Delivery,
        handler: &dyn MessageHandler,
    ) {
        let topic = match delivery.routing_key.as_str().parse::<Topic>() {
            Ok(topic) => topic,
            Err(e) => {
                error!(
                    consumer_group = %group,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Unroutable message, rejecting"
                );
                let _ = delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await;
                return;
            }
        };

        if let Err(e) = handler.handle(topic, &delivery.data).await {
            error!(
                subsystem = "bus",
                consumer_group = %group,
                topic = %topic,
                error = %e,
                "Handler failed"
            );
        }

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!(consumer_group = %group, error = %e, "Failed to ack message");
        }
    }
}

#[async_trait]
impl EventBus for AmqpEventBus {
    async fn publish(&self, topic: Topic, body: &[u8]) -> Result<()> {
        let max_retries = defaults::BUS_PUBLISH_RETRIES;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(max_retries)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            // Fresh channel per attempt picks up a reconnected pool.
            let channel = match open_channel(&self.pool).await {
                Ok(ch) => ch,
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Failed to get channel, retrying"
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2);

            match channel
                .basic_publish(
                    &self.config.exchange,
                    topic.as_str(),
                    BasicPublishOptions::default(),
                    body,
                    properties,
                )
                .await
            {
                Ok(confirm) => match confirm.await {
                    Ok(_) => {
                        debug!(
                            exchange = %self.config.exchange,
                            topic = %topic,
                            "Published event"
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            error = %e,
                            "Publish confirmation failed, retrying"
                        );
                        last_error = Some(BusError::Publish(format!(
                            "Publish confirmation failed: {}",
                            e
                        )));
                    }
                },
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    last_error = Some(BusError::Publish(format!("Failed to publish: {}", e)));
                }
            }
        }

        let err =
            last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string()));
        error!(topic = %topic, error = %err, "Publish gave up");
        Err(err)
    }

    async fn subscribe(
        &self,
        topics: &[Topic],
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        if topics.is_empty() {
            return Err(BusError::Subscribe(format!(
                "group {} subscribed to no topics",
                group
            )));
        }

        let pool = self.pool.clone();
        let exchange = self.config.exchange.clone();
        let group_name = group.to_string();
        let topics = topics.to_vec();

        let task = tokio::spawn(async move {
            Self::consume_with_reconnect(pool, exchange, group_name, topics, handler).await;
        });

        Ok(Subscription::new(group, task))
    }

    fn backend(&self) -> &'static str {
        "amqp"
    }
}


/// Integration tests requiring a running RabbitMQ instance.
///
/// Run with: AMQP_URL=amqp://localhost:5672 cargo test -p scrumflow-bus -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use tokio::sync::mpsc;

    fn amqp_url() -> String {
        std::env::var("AMQP_URL").unwrap_or_else(|_| defaults::AMQP_URL.to_string())
    }

    struct Forward(mpsc::UnboundedSender<(Topic, Vec<u8>)>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(&self, topic: Topic, body: &[u8]) -> scrumflow_core::Result<()> {
            let _ = self.0.send((topic, body.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn test_publish_and_consume() {
        let mut config = AmqpConfig::new(amqp_url());
        config.exchange = format!("test-exchange-{}", Uuid::new_v4().simple());
        let bus = AmqpEventBus::new(config).await.expect("connect");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let group = format!("test-group-{}", Uuid::new_v4().simple());
        let sub = bus
            .subscribe(&[Topic::ScrumSprint], &group, Arc::new(Forward(tx)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        bus.publish(Topic::ScrumSprint, br#"{"action":"COMPLETED"}"#)
            .await
            .unwrap();

        let (topic, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timed out waiting for message")
            .expect("Channel closed");
        assert_eq!(topic, Topic::ScrumSprint);
        assert_eq!(body, br#"{"action":"COMPLETED"}"#);

        sub.stop().await;
    }
}
