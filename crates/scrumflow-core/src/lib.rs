//! # scrumflow-core
//!
//! Core types, traits, and abstractions for the scrumflow event pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other scrumflow crates depend on: the topic taxonomy, the event
//! envelope with its validated domain events, aggregate and record models,
//! and the repository and push seams.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod topics;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    DomainEvent, EventEnvelope, ImpedimentCreated, ImpedimentResolved, SprintCompleted,
    SprintStarted, TaskAssigned, TaskStatusChanged, ValidationError,
};
pub use models::*;
pub use topics::Topic;
pub use traits::*;
