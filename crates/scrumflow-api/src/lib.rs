//! # scrumflow-api
//!
//! HTTP surface and WebSocket push gateway for the scrumflow pipeline.
//!
//! The binary in `main.rs` wires configuration, the event bus, the consumer
//! pipeline and this router together; integration tests build the same
//! router over in-memory state.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::ApiError;
pub use gateway::{ConnectionRegistry, Gateway, InMemoryRegistry};
pub use routes::{api_routes, app};
pub use state::AppState;
