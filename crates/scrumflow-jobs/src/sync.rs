//! Synchronous backfill from the owning Scrum service.
//!
//! Pulls sprint state over HTTP and regenerates the derived rows the event
//! path would otherwise produce: the daily burndown series and, for completed
//! sprints, the team velocity row.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use reqwest::{redirect, Client, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use scrumflow_core::{defaults, DailyBurndown, Error, Result, SprintSnapshot, VelocityUpsert};
use scrumflow_db::Database;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Where sprint state comes from.
#[async_trait]
pub trait SprintSource: Send + Sync {
    /// Fetch one sprint. `Ok(None)` when the owning service does not know
    /// it; transport failures and error statuses are `Err`.
    async fn fetch_sprint(&self, id: i64) -> Result<Option<SprintSnapshot>>;

    /// Every sprint known to the owning service.
    async fn list_sprints(&self) -> Result<Vec<SprintSnapshot>>;
}

/// HTTP client settings for the owning service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::SCRUM_API_URL.to_string(),
            timeout: Duration::from_millis(defaults::SYNC_HTTP_TIMEOUT_MS),
            max_redirects: defaults::SYNC_MAX_REDIRECTS,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SCRUM_API_URL` | `http://localhost:8081/api` |
    /// | `SYNC_HTTP_TIMEOUT_MS` | `5000` |
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("SCRUM_API_URL").unwrap_or_else(|_| defaults::SCRUM_API_URL.to_string());
        let timeout_ms = std::env::var("SYNC_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SYNC_HTTP_TIMEOUT_MS);
        Self {
            base_url,
            timeout: Duration::from_millis(timeout_ms),
            max_redirects: defaults::SYNC_MAX_REDIRECTS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// [`SprintSource`] backed by the owning service's REST API.
pub struct HttpSprintSource {
    client: Client,
    base_url: String,
}

impl HttpSprintSource {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SprintSource for HttpSprintSource {
    async fn fetch_sprint(&self, id: i64) -> Result<Option<SprintSnapshot>> {
        let url = format!("{}/sprints/{}", self.base_url, id);
        let response = self.client.get(&url).send().await.map_err(|e| {
            error!(subsystem = "jobs", component = "sync", sprint_id = id, error = %e, "Sprint fetch failed");
            Error::Request(format!("GET {} failed: {}", url, e))
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(subsystem = "jobs", component = "sync", sprint_id = id, "Sprint not found upstream");
            return Ok(None);
        }
        if !response.status().is_success() {
            error!(
                subsystem = "jobs",
                component = "sync",
                sprint_id = id,
                status = response.status().as_u16(),
                "Sprint fetch returned error status"
            );
            return Err(Error::Request(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let snapshot = response.json::<SprintSnapshot>().await.map_err(|e| {
            error!(subsystem = "jobs", component = "sync", sprint_id = id, error = %e, "Sprint body did not decode");
            Error::Request(format!("GET {} returned an undecodable body: {}", url, e))
        })?;
        Ok(Some(snapshot))
    }

    async fn list_sprints(&self) -> Result<Vec<SprintSnapshot>> {
        let url = format!("{}/sprints", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Request(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response.json::<Vec<SprintSnapshot>>().await?)
    }
}

/// Result of syncing one sprint.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    NotFound,
    Synced {
        /// Daily rows written; 0 when the series was skipped.
        burndown_days: usize,
        /// Velocity recorded, when the sprint was completed with a team.
        velocity: Option<f64>,
    },
}

impl SyncOutcome {
    pub fn message(&self, sprint_id: i64) -> String {
        match self {
            SyncOutcome::NotFound => format!("Sprint {} not found", sprint_id),
            SyncOutcome::Synced { .. } => {
                format!("Successfully synced data for sprint {}", sprint_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAllReport {
    pub message: String,
    pub synced: u64,
}

/// Regenerates aggregates from a [`SprintSource`].
#[derive(Clone)]
pub struct SyncService {
    source: Arc<dyn SprintSource>,
    db: Database,
}

impl SyncService {
    pub fn new(source: Arc<dyn SprintSource>, db: Database) -> Self {
        Self { source, db }
    }

    pub async fn sync_sprint(&self, sprint_id: i64) -> Result<SyncOutcome> {
        let start = Instant::now();
        let Some(sprint) = self.source.fetch_sprint(sprint_id).await? else {
            info!(subsystem = "jobs", component = "sync", sprint_id, "Sprint not found, nothing to sync");
            return Ok(SyncOutcome::NotFound);
        };

        let burndown_days = match generate_daily_burndown(&sprint) {
            Some(rows) => self.db.daily_burndown.replace_for_sprint(sprint.id, rows).await?,
            None => {
                warn!(
                    subsystem = "jobs",
                    component = "sync",
                    sprint_id,
                    "Sprint has no committed points or dates, skipping burndown"
                );
                0
            }
        };

        let velocity = match (sprint.is_completed(), sprint.team_id) {
            (true, Some(team_id)) => {
                let velocity = sprint
                    .velocity
                    .or(sprint.completed_points)
                    .unwrap_or(0.0);
                self.db
                    .velocity
                    .upsert(VelocityUpsert {
                        team_id,
                        sprint_id: sprint.id,
                        sprint_name: sprint.name.clone(),
                        velocity,
                        sprint_end_date: sprint.end(),
                    })
                    .await?;
                Some(velocity)
            }
            _ => None,
        };

        info!(
            subsystem = "jobs",
            component = "sync",
            op = "sync_sprint",
            sprint_id,
            burndown_days,
            velocity = velocity.unwrap_or_default(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Sprint synced"
        );

        Ok(SyncOutcome::Synced {
            burndown_days,
            velocity,
        })
    }

    /// Sync every sprint the source lists. One failing sprint is logged and
    /// left out of the count; failing to list at all is an error. A sprint
    /// that vanished between list and fetch counts as synced.
    pub async fn sync_all(&self) -> Result<SyncAllReport> {
        let sprints = self.source.list_sprints().await?;
        let mut synced = 0u64;

        for sprint in &sprints {
            match self.sync_sprint(sprint.id).await {
                Ok(_) => synced += 1,
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "sync",
                    sprint_id = sprint.id,
                    error = %e,
                    "Failed to sync sprint"
                ),
            }
        }

        info!(
            subsystem = "jobs",
            component = "sync",
            op = "sync_all",
            listed = sprints.len(),
            count = synced,
            "Sync complete"
        );

        Ok(SyncAllReport {
            message: format!("Successfully synced {} sprints", synced),
            synced,
        })
    }
}

/// Build the daily burndown series for a sprint.
///
/// Returns `None` when committed points are missing or zero, or either date
/// is missing. A sprint shorter than one day yields a single, final row.
pub fn generate_daily_burndown(sprint: &SprintSnapshot) -> Option<Vec<DailyBurndown>> {
    let committed = sprint.committed_points.filter(|c| *c != 0.0)?;
    let start = sprint.start()?;
    let end = sprint.end()?;
    let completed = sprint.completed_points.filter(|c| *c != 0.0);

    let total_days = ((end - start).num_milliseconds() as f64 / MS_PER_DAY).ceil() as i64;
    let first_day = start.date_naive();

    let row = |day: i64, fraction: f64| {
        let ideal = (committed * (1.0 - fraction)).max(0.0);
        let progress = match completed {
            Some(done) => fraction.min(done / committed),
            None => fraction,
        };
        let remaining = (committed * (1.0 - progress)).max(0.0);
        DailyBurndown {
            sprint_id: sprint.id,
            date: first_day + ChronoDuration::days(day),
            remaining_points: remaining,
            ideal_remaining_points: ideal,
            completed_points: committed - remaining,
            added_points: 0.0,
        }
    };

    if total_days <= 0 {
        return Some(vec![row(0, 1.0)]);
    }

    Some(
        (0..=total_days)
            .map(|i| row(i, i as f64 / total_days as f64))
            .collect(),
    )
}
