//! Structured logging schema and field name constants for scrumflow.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query consumers, transports and HTTP handlers uniformly.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, message dropped or step skipped |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, dispatch choices, config values |
//! | TRACE | Per-message payload detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from the HTTP request id.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "bus", "db", "jobs", "gateway"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "reconciler", "fanout", "log_drain", "sync", "amqp", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upsert_velocity", "drain", "publish", "sync_sprint"
pub const OPERATION: &str = "op";

// ─── Messaging fields ──────────────────────────────────────────────────────

/// Bus topic (routing key).
pub const TOPIC: &str = "topic";

/// Consumer group name.
pub const CONSUMER_GROUP: &str = "consumer_group";

/// Event action within a topic (`COMPLETED`, `ASSIGNED`, ...).
pub const ACTION: &str = "action";

/// UUIDv7 stamped on each received envelope.
pub const EVENT_ID: &str = "event_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Sprint being reconciled or synced.
pub const SPRINT_ID: &str = "sprint_id";

/// Project owning the entity.
pub const PROJECT_ID: &str = "project_id";

/// User receiving a notification or push.
pub const USER_ID: &str = "user_id";

/// Live WebSocket connection id.
pub const CONNECTION_ID: &str = "connection_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows or messages affected.
pub const COUNT: &str = "count";

/// Number of messages rejected by a drain.
pub const REJECTED: &str = "rejected";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique() {
        let fields = [
            REQUEST_ID,
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            TOPIC,
            CONSUMER_GROUP,
            ACTION,
            EVENT_ID,
            SPRINT_ID,
            PROJECT_ID,
            USER_ID,
            CONNECTION_ID,
            DURATION_MS,
            COUNT,
            REJECTED,
            POOL_SIZE,
            POOL_IDLE,
            DB_TABLE,
            SUCCESS,
            ERROR_MSG,
        ];
        let unique: std::collections::HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
    }

    #[test]
    fn test_field_names_are_snake_case() {
        for field in [SPRINT_ID, CONSUMER_GROUP, DURATION_MS, OPERATION] {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
