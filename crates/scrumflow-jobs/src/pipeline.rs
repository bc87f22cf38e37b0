//! Pipeline supervisor.
//!
//! Wires the consumers onto the event bus under their consumer groups and, in
//! streaming mode, runs the log drain. The returned [`PipelineHandle`] stops
//! everything on shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use scrumflow_bus::{EventBus, LogQueue, Subscription};
use scrumflow_core::{defaults, PushSink, Result, Topic};
use scrumflow_db::Database;

use crate::dead_letter::DeadLetterSink;
use crate::fanout::FanOut;
use crate::log_drain::{DrainMode, DrainReport, LogDrain, LogDrainConfig};
use crate::reconciler::Reconciler;

/// Configuration for the consumer pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether to start the consumers at all.
    pub enabled: bool,
    pub drain: LogDrainConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            drain: LogDrainConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_ENABLED` | `true` | Enable/disable the bus consumers |
    ///
    /// Drain settings come from [`LogDrainConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let enabled = std::env::var("PIPELINE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        Ok(Self {
            enabled,
            drain: LogDrainConfig::from_env()?,
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_drain(mut self, drain: LogDrainConfig) -> Self {
        self.drain = drain;
        self
    }
}

/// Handle for controlling a running pipeline.
pub struct PipelineHandle {
    subscriptions: Vec<Subscription>,
    shutdown_tx: watch::Sender<bool>,
    drain_task: Option<JoinHandle<DrainReport>>,
}

impl PipelineHandle {
    /// True while at least one consumer task is alive.
    pub fn is_running(&self) -> bool {
        self.subscriptions.iter().any(|s| !s.is_finished())
            || self.drain_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Consumer groups currently subscribed.
    pub fn groups(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.group()).collect()
    }

    /// Stop every consumer and wait for the streaming drain to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for subscription in self.subscriptions {
            subscription.stop().await;
        }

        if let Some(task) = self.drain_task {
            match task.await {
                Ok(report) => debug!(
                    subsystem = "jobs",
                    count = report.count,
                    rejected = report.rejected,
                    "Log drain joined"
                ),
                Err(e) => error!(subsystem = "jobs", error = ?e, "Log drain task panicked"),
            }
        }

        info!(subsystem = "jobs", "Pipeline stopped");
    }
}

/// Builds and starts the consumers.
pub struct Pipeline {
    bus: Arc<dyn EventBus>,
    db: Database,
    push: Arc<dyn PushSink>,
    log_queue: Option<Arc<dyn LogQueue>>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        bus: Arc<dyn EventBus>,
        db: Database,
        push: Arc<dyn PushSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            bus,
            db,
            push,
            log_queue: None,
            config,
        }
    }

    /// Attach the log queue; required for the streaming drain.
    pub fn with_log_queue(mut self, queue: Arc<dyn LogQueue>) -> Self {
        self.log_queue = Some(queue);
        self
    }

    /// Subscribe the consumers and return a handle for control.
    pub async fn start(self) -> Result<PipelineHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!(subsystem = "jobs", "Pipeline is disabled, not starting consumers");
            return Ok(PipelineHandle {
                subscriptions: Vec::new(),
                shutdown_tx,
                drain_task: None,
            });
        }

        let reconciler = Reconciler::new(
            self.db.clone(),
            DeadLetterSink::new(self.db.dead_letters.clone(), defaults::REPORTING_GROUP),
        );
        let fanout = FanOut::new(
            self.db.clone(),
            self.push.clone(),
            DeadLetterSink::new(self.db.dead_letters.clone(), defaults::COLLABORATION_GROUP),
        );

        let mut subscriptions = Vec::with_capacity(2);
        subscriptions.push(
            self.bus
                .subscribe(
                    &[Topic::ScrumSprint],
                    defaults::REPORTING_GROUP,
                    Arc::new(reconciler),
                )
                .await?,
        );
        subscriptions.push(
            self.bus
                .subscribe(&Topic::ALL, defaults::COLLABORATION_GROUP, Arc::new(fanout))
                .await?,
        );

        let drain_task = match (&self.log_queue, self.config.drain.mode) {
            (Some(queue), DrainMode::Streaming) => {
                let drain = LogDrain::new(
                    queue.clone(),
                    self.db.logs.clone(),
                    self.config.drain.clone(),
                );
                Some(tokio::spawn(async move {
                    drain.run_streaming(shutdown_rx).await
                }))
            }
            (None, DrainMode::Streaming) => {
                error!(
                    subsystem = "jobs",
                    "Streaming log drain configured without a log queue, not starting it"
                );
                None
            }
            (_, DrainMode::Batch) => None,
        };

        info!(
            subsystem = "jobs",
            backend = self.bus.backend(),
            consumers = subscriptions.len(),
            drain_mode = self.config.drain.mode.as_str(),
            "Pipeline started"
        );

        Ok(PipelineHandle {
            subscriptions,
            shutdown_tx,
            drain_task,
        })
    }
}
