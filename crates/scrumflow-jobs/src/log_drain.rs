//! Log ingestion queue drain.
//!
//! Two strategies move log lines from the durable queue into the `logs` table:
//!
//! - **Batch** ([`LogDrain::drain`]): pull with `get` until the queue is empty,
//!   persist every parsed line in one insert, then acknowledge. Triggered on
//!   demand by `POST /logs`.
//! - **Streaming** ([`LogDrain::run_streaming`]): a long-lived consumer with
//!   bounded prefetch that persists and acknowledges one message at a time.
//!
//! Lines that fail to parse are rejected without requeue in both modes.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use scrumflow_bus::{LogMessage, LogQueue};
use scrumflow_core::events::parse_datetime_str;
use scrumflow_core::{defaults, Error, LogRepository, LogType, NewLogEntry, Result};

/// Delay before re-opening a failed consumer stream; doubles up to the cap.
const REOPEN_DELAY: Duration = Duration::from_secs(1);
const REOPEN_DELAY_MAX: Duration = Duration::from_secs(30);

/// Drain strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    Streaming,
    #[default]
    Batch,
}

impl DrainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainMode::Streaming => "streaming",
            DrainMode::Batch => "batch",
        }
    }
}

impl FromStr for DrainMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" | "stream" => Ok(DrainMode::Streaming),
            "batch" => Ok(DrainMode::Batch),
            other => Err(Error::Config(format!("unknown LOG_DRAIN_MODE: {}", other))),
        }
    }
}

/// Configuration for the log drain.
#[derive(Debug, Clone)]
pub struct LogDrainConfig {
    pub mode: DrainMode,
    /// Unsettled messages allowed in streaming mode.
    pub prefetch: u16,
}

impl Default for LogDrainConfig {
    fn default() -> Self {
        Self {
            mode: DrainMode::default(),
            prefetch: defaults::LOG_DRAIN_PREFETCH,
        }
    }
}

impl LogDrainConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LOG_DRAIN_MODE` | `batch` | `batch` or `streaming` |
    /// | `LOG_DRAIN_PREFETCH` | `10` | Streaming prefetch window |
    pub fn from_env() -> Result<Self> {
        let mode = match std::env::var("LOG_DRAIN_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => DrainMode::default(),
        };
        let prefetch = std::env::var("LOG_DRAIN_PREFETCH")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults::LOG_DRAIN_PREFETCH)
            .max(1);
        Ok(Self { mode, prefetch })
    }

    pub fn with_mode(mut self, mode: DrainMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }
}

/// Outcome of a drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Lines persisted.
    pub count: u64,
    /// Messages rejected as unparseable or unpersistable.
    pub rejected: u64,
}

/// Parse one queue message into a storable log line.
///
/// `timestamp` may be an RFC 3339 string or epoch milliseconds. A missing or
/// invalid timestamp is an error; the current time is never substituted.
pub fn parse_log_message(body: &[u8]) -> Result<NewLogEntry> {
    let value: JsonValue = serde_json::from_slice(body)?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidInput("log message is not a JSON object".into()))?;

    let timestamp = match obj.get("timestamp") {
        Some(JsonValue::String(s)) => parse_datetime_str(s)
            .map_err(|e| Error::InvalidInput(format!("invalid timestamp: {}", e)))?,
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| Error::InvalidInput(format!("invalid epoch timestamp: {}", n)))?,
        _ => return Err(Error::InvalidInput("missing timestamp".into())),
    };

    let text = |key: &str| obj.get(key).and_then(JsonValue::as_str).map(String::from);

    let log_type: LogType = text("logType")
        .ok_or_else(|| Error::InvalidInput("missing logType".into()))?
        .parse()?;
    let application_name =
        text("applicationName").ok_or_else(|| Error::InvalidInput("missing applicationName".into()))?;
    let message = text("message").ok_or_else(|| Error::InvalidInput("missing message".into()))?;

    Ok(NewLogEntry {
        timestamp,
        log_type,
        url: text("url"),
        correlation_id: text("correlationId"),
        application_name,
        message,
    })
}

/// Moves log lines from the queue into storage.
#[derive(Clone)]
pub struct LogDrain {
    queue: Arc<dyn LogQueue>,
    logs: Arc<dyn LogRepository>,
    config: LogDrainConfig,
}

impl LogDrain {
    pub fn new(queue: Arc<dyn LogQueue>, logs: Arc<dyn LogRepository>, config: LogDrainConfig) -> Self {
        Self {
            queue,
            logs,
            config,
        }
    }

    pub fn mode(&self) -> DrainMode {
        self.config.mode
    }

    /// Empty the queue into storage in one batch.
    ///
    /// Parsed messages are acknowledged only after the batch insert succeeds;
    /// if it fails they are requeued and the error returned.
    pub async fn drain(&self) -> Result<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport::default();
        let mut held: Vec<LogMessage> = Vec::new();
        let mut entries: Vec<NewLogEntry> = Vec::new();

        while let Some(msg) = self.queue.get().await? {
            match parse_log_message(msg.body()) {
                Ok(entry) => {
                    entries.push(entry);
                    held.push(msg);
                }
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "log_drain",
                        error = %e,
                        body = %String::from_utf8_lossy(msg.body()),
                        "Rejecting unparseable log message"
                    );
                    msg.reject().await?;
                    report.rejected += 1;
                }
            }
        }

        if entries.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "log_drain",
                rejected = report.rejected,
                "Queue empty"
            );
            return Ok(report);
        }

        match self.logs.insert_batch(entries).await {
            Ok(inserted) => {
                for msg in held {
                    msg.ack().await?;
                }
                report.count = inserted;
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "log_drain",
                    count = held.len(),
                    error = %e,
                    "Batch insert failed, requeueing"
                );
                for msg in held {
                    if let Err(re) = msg.requeue().await {
                        warn!(subsystem = "jobs", component = "log_drain", error = %re, "Requeue failed");
                    }
                }
                return Err(e);
            }
        }

        info!(
            subsystem = "jobs",
            component = "log_drain",
            op = "drain",
            count = report.count,
            rejected = report.rejected,
            duration_ms = start.elapsed().as_millis() as u64,
            "Log batch drained"
        );
        Ok(report)
    }

    /// Consume the queue until `shutdown` flips to `true`.
    ///
    /// Per-message failures never end the loop; a broken consumer stream is
    /// re-opened with backoff.
    pub async fn run_streaming(&self, mut shutdown: watch::Receiver<bool>) -> DrainReport {
        let mut report = DrainReport::default();
        let mut delay = REOPEN_DELAY;

        info!(
            subsystem = "jobs",
            component = "log_drain",
            prefetch = self.config.prefetch,
            "Streaming log drain started"
        );

        'outer: while !*shutdown.borrow() {
            let mut stream = match self.queue.stream(self.config.prefetch).await {
                Ok(stream) => {
                    delay = REOPEN_DELAY;
                    stream
                }
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "log_drain",
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to open log stream"
                    );
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break 'outer;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(REOPEN_DELAY_MAX);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'outer;
                        }
                    }
                    next = stream.next() => match next {
                        Some(Ok(msg)) => self.handle_one(msg, &mut report).await,
                        Some(Err(e)) => {
                            warn!(subsystem = "jobs", component = "log_drain", error = %e, "Log stream error");
                            break;
                        }
                        None => {
                            warn!(subsystem = "jobs", component = "log_drain", "Log stream ended, reopening");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            subsystem = "jobs",
            component = "log_drain",
            count = report.count,
            rejected = report.rejected,
            "Streaming log drain stopped"
        );
        report
    }

    async fn handle_one(&self, msg: LogMessage, report: &mut DrainReport) {
        let entry = match parse_log_message(msg.body()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "log_drain",
                    error = %e,
                    body = %String::from_utf8_lossy(msg.body()),
                    "Rejecting unparseable log message"
                );
                settle(msg.reject().await);
                report.rejected += 1;
                return;
            }
        };

        match self.logs.insert(entry).await {
            Ok(_) => {
                settle(msg.ack().await);
                report.count += 1;
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "log_drain",
                    error = %e,
                    "Failed to persist log message, rejecting"
                );
                settle(msg.reject().await);
                report.rejected += 1;
            }
        }
    }
}

fn settle(result: scrumflow_bus::Result<()>) {
    if let Err(e) = result {
        warn!(subsystem = "jobs", component = "log_drain", error = %e, "Failed to settle message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use scrumflow_bus::InMemoryLogQueue;
    use scrumflow_core::LogEntry;
    use scrumflow_db::MemoryStore;

    fn line(ts: &str, log_type: &str) -> Vec<u8> {
        format!(
            r#"{{"timestamp":{ts},"logType":"{log_type}","url":"/api/tasks","correlationId":"c-1","applicationName":"scrum-core","message":"hello"}}"#
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_rfc3339_and_epoch_millis() {
        let a = parse_log_message(&line(r#""2024-03-01T10:00:00Z""#, "INFO")).unwrap();
        let b = parse_log_message(&line("1709287200000", "WARN")).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(a.timestamp, expected);
        assert_eq!(b.timestamp, expected);
        assert_eq!(b.log_type, LogType::Warn);
        assert_eq!(a.correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_log_message(&line(r#""yesterday""#, "INFO")).is_err());
        assert!(parse_log_message(&line(r#""2024-03-01T10:00:00Z""#, "TRACE")).is_err());
        assert!(parse_log_message(br#"{"logType":"INFO","applicationName":"a","message":"m"}"#).is_err());
        assert!(parse_log_message(br#"{"timestamp":1,"logType":"INFO","message":"m"}"#).is_err());
        assert!(parse_log_message(b"not json").is_err());
    }

    #[test]
    fn test_drain_mode_parse() {
        assert_eq!("streaming".parse::<DrainMode>().unwrap(), DrainMode::Streaming);
        assert_eq!("BATCH".parse::<DrainMode>().unwrap(), DrainMode::Batch);
        assert!("lazy".parse::<DrainMode>().is_err());
        assert_eq!(LogDrainConfig::default().mode, DrainMode::Batch);
        assert_eq!(LogDrainConfig::default().prefetch, 10);
    }

    #[tokio::test]
    async fn test_batch_drain_persists_and_rejects() {
        let queue = InMemoryLogQueue::new();
        let store = Arc::new(MemoryStore::new());
        queue.publish(&line(r#""2024-03-01T10:00:00Z""#, "INFO")).await.unwrap();
        queue.publish(&line(r#""garbage""#, "INFO")).await.unwrap();
        queue.publish(&line("1709287200000", "ERROR")).await.unwrap();

        let drain = LogDrain::new(Arc::new(queue.clone()), store.clone(), LogDrainConfig::default());
        let report = drain.drain().await.unwrap();

        assert_eq!(report, DrainReport { count: 2, rejected: 1 });
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(queue.acked(), 2);
        assert_eq!(queue.rejected(), 1);
        assert_eq!(queue.pending().await, 0);

        let again = drain.drain().await.unwrap();
        assert_eq!(again, DrainReport::default());
    }

    struct FailingLogs;

    #[async_trait]
    impl LogRepository for FailingLogs {
        async fn insert(&self, _entry: NewLogEntry) -> Result<LogEntry> {
            Err(Error::Internal("disk full".into()))
        }
        async fn insert_batch(&self, _entries: Vec<NewLogEntry>) -> Result<u64> {
            Err(Error::Internal("disk full".into()))
        }
        async fn list_range(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<LogEntry>> {
            Ok(vec![])
        }
        async fn delete_all(&self) -> Result<u64> {
            Ok(0)
        }
        async fn count(&self) -> Result<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_batch_failure_requeues() {
        let queue = InMemoryLogQueue::new();
        queue.publish(&line(r#""2024-03-01T10:00:00Z""#, "INFO")).await.unwrap();
        queue.publish(&line(r#""2024-03-01T10:00:01Z""#, "INFO")).await.unwrap();

        let drain = LogDrain::new(
            Arc::new(queue.clone()),
            Arc::new(FailingLogs),
            LogDrainConfig::default(),
        );
        assert!(drain.drain().await.is_err());
        assert_eq!(queue.pending().await, 2);
        assert_eq!(queue.acked(), 0);
    }

    #[tokio::test]
    async fn test_streaming_survives_malformed_message() {
        let queue = InMemoryLogQueue::new();
        let store = Arc::new(MemoryStore::new());
        let drain = LogDrain::new(
            Arc::new(queue.clone()),
            store.clone(),
            LogDrainConfig::default().with_mode(DrainMode::Streaming),
        );

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { drain.run_streaming(rx).await });

        queue.publish(&line(r#""not a date""#, "INFO")).await.unwrap();
        queue.publish(&line(r#""2024-03-01T10:00:00Z""#, "INFO")).await.unwrap();

        for _ in 0..100 {
            if queue.acked() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        let report = task.await.unwrap();

        assert_eq!(report, DrainReport { count: 1, rejected: 1 });
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_streaming_persistence_error_rejects() {
        let queue = InMemoryLogQueue::new();
        let drain = LogDrain::new(
            Arc::new(queue.clone()),
            Arc::new(FailingLogs),
            LogDrainConfig::default().with_mode(DrainMode::Streaming),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { drain.run_streaming(rx).await });

        queue.publish(&line(r#""2024-03-01T10:00:00Z""#, "DEBUG")).await.unwrap();
        for _ in 0..100 {
            if queue.rejected() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.count, 0);
    }
}
