//! # scrumflow-jobs
//!
//! Event consumers for the scrumflow pipeline.
//!
//! This crate provides:
//! - The sprint completion reconciler (velocity, burndown and metrics upserts)
//! - The activity/notification fan-out consumer
//! - The log ingestion queue drain (batch or streaming)
//! - The sync service that regenerates aggregates from the owning Scrum service
//! - A pipeline supervisor wiring the consumers onto the event bus
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scrumflow_bus::InMemoryEventBus;
//! use scrumflow_db::Database;
//! use scrumflow_jobs::{Pipeline, PipelineConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let bus = Arc::new(InMemoryEventBus::new());
//!
//! let handle = Pipeline::new(bus, db, push_sink, PipelineConfig::from_env()?)
//!     .start()
//!     .await?;
//!
//! // Graceful shutdown
//! handle.shutdown().await;
//! ```

pub mod dead_letter;
pub mod fanout;
pub mod log_drain;
pub mod pipeline;
pub mod reconciler;
pub mod sync;

// Re-export core types
pub use scrumflow_core::*;

pub use dead_letter::DeadLetterSink;
pub use fanout::{FanOut, FanOutReport};
pub use log_drain::{parse_log_message, DrainMode, DrainReport, LogDrain, LogDrainConfig};
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle};
pub use reconciler::{ReconcileReport, Reconciler, StepOutcome};
pub use sync::{
    generate_daily_burndown, HttpSprintSource, SprintSource, SyncAllReport, SyncConfig,
    SyncOutcome, SyncService,
};
