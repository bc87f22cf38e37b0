//! Real-time push gateway.
//!
//! Authenticated WebSocket clients are tracked per user and per room; the
//! fan-out consumer pushes to them through [`Gateway`], which implements the
//! core `PushSink` seam.

pub mod auth;
pub mod push;
pub mod registry;
pub mod socket;

pub use auth::{extract_token, AuthError, Claims, TokenVerifier};
pub use push::Gateway;
pub use registry::{ConnectionId, ConnectionRegistry, FrameSender, InMemoryRegistry, Room};
pub use socket::{parse_client_frame, ws_handler, RoomCommand};
