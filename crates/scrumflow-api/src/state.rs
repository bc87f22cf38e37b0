//! Shared handler state.

use std::sync::Arc;

use scrumflow_bus::{EventBus, LogQueue};
use scrumflow_core::defaults;
use scrumflow_db::Database;
use scrumflow_jobs::{DeadLetterSink, LogDrain, LogDrainConfig, Reconciler, SprintSource, SyncService};

use crate::gateway::Gateway;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub bus: Arc<dyn EventBus>,
    pub gateway: Gateway,
    pub sync: SyncService,
    /// Direct path for `POST /sync/sprint-completion`.
    pub reconciler: Reconciler,
    pub log_drain: LogDrain,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        db: Database,
        bus: Arc<dyn EventBus>,
        gateway: Gateway,
        sprint_source: Arc<dyn SprintSource>,
        log_queue: Arc<dyn LogQueue>,
        drain_config: LogDrainConfig,
    ) -> Self {
        let reconciler = Reconciler::new(
            db.clone(),
            DeadLetterSink::new(db.dead_letters.clone(), defaults::REPORTING_GROUP),
        );
        Self {
            sync: SyncService::new(sprint_source, db.clone()),
            log_drain: LogDrain::new(log_queue, db.logs.clone(), drain_config),
            reconciler,
            gateway,
            bus,
            db,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
