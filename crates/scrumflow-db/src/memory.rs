//! In-memory storage backend.
//!
//! Mirrors the PostgreSQL repositories closely enough for unit and end-to-end
//! tests: upserts are keyed by sprint id, burndown numbering is assigned once
//! per project, and every listing uses the same ordering as the SQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use scrumflow_core::{
    ActivityLog, ActivityRepository, BurndownRepository, BurndownUpsert, DailyBurndown,
    DailyBurndownRepository, DeadLetter, DeadLetterRepository, LogEntry, LogRepository,
    MetricsUpsert, NewActivityLog, NewDeadLetter, NewLogEntry, NewNotification, Notification,
    NotificationRepository, ProjectBurndown, Result, SprintMetrics, SprintMetricsRepository,
    TeamVelocity, VelocityRepository, VelocityUpsert,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    velocity: HashMap<i64, TeamVelocity>,
    burndown: HashMap<i64, ProjectBurndown>,
    metrics: HashMap<i64, SprintMetrics>,
    daily: HashMap<i64, Vec<DailyBurndown>>,
    activity: Vec<ActivityLog>,
    notifications: Vec<Notification>,
    logs: Vec<LogEntry>,
    dead_letters: Vec<DeadLetter>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory store implementing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(mut rows: Vec<T>, limit: i64) -> Vec<T> {
    rows.reverse();
    rows.truncate(limit.max(0) as usize);
    rows
}

#[async_trait]
impl VelocityRepository for MemoryStore {
    async fn upsert(&self, req: VelocityUpsert) -> Result<TeamVelocity> {
        let mut t = self.tables.lock().await;
        let id = match t.velocity.get(&req.sprint_id) {
            Some(existing) => existing.id,
            None => t.id(),
        };
        let sprint_name = req.sprint_name.or_else(|| {
            t.velocity
                .get(&req.sprint_id)
                .and_then(|v| v.sprint_name.clone())
        });
        let row = TeamVelocity {
            id,
            team_id: req.team_id,
            sprint_id: req.sprint_id,
            sprint_name,
            velocity: req.velocity,
            sprint_end_date: req.sprint_end_date,
            calculated_at: Utc::now(),
        };
        t.velocity.insert(req.sprint_id, row.clone());
        Ok(row)
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<TeamVelocity>> {
        Ok(self.tables.lock().await.velocity.get(&sprint_id).cloned())
    }

    async fn list_by_team(&self, team_id: i64) -> Result<Vec<TeamVelocity>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<TeamVelocity> = t
            .velocity
            .values()
            .filter(|v| v.team_id == team_id)
            .cloned()
            .collect();
        rows.sort_by_key(|v| (v.sprint_end_date, v.id));
        Ok(rows)
    }

    async fn recent_by_team(&self, team_id: i64, limit: i64) -> Result<Vec<TeamVelocity>> {
        let rows = VelocityRepository::list_by_team(self, team_id).await?;
        // Ascending with nulls first, reversed: newest first with nulls last.
        Ok(newest_first(rows, limit))
    }
}

#[async_trait]
impl BurndownRepository for MemoryStore {
    async fn upsert(&self, req: BurndownUpsert) -> Result<ProjectBurndown> {
        let mut t = self.tables.lock().await;
        let row = match t.burndown.get(&req.sprint_id).cloned() {
            Some(existing) => ProjectBurndown {
                sprint_name: req.sprint_name.or(existing.sprint_name),
                backlog_items_remaining: req.backlog_items_remaining,
                items_completed_in_sprint: req.items_completed_in_sprint,
                completed_points: req.completed_points,
                sprint_end_date: req.sprint_end_date,
                recorded_at: Utc::now(),
                ..existing
            },
            None => {
                let sprint_number = t
                    .burndown
                    .values()
                    .filter(|b| b.project_id == req.project_id)
                    .count() as i32
                    + 1;
                ProjectBurndown {
                    id: t.id(),
                    project_id: req.project_id,
                    sprint_id: req.sprint_id,
                    sprint_number,
                    sprint_name: req.sprint_name,
                    backlog_items_remaining: req.backlog_items_remaining,
                    items_completed_in_sprint: req.items_completed_in_sprint,
                    completed_points: req.completed_points,
                    sprint_end_date: req.sprint_end_date,
                    recorded_at: Utc::now(),
                }
            }
        };
        t.burndown.insert(req.sprint_id, row.clone());
        Ok(row)
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<ProjectBurndown>> {
        Ok(self.tables.lock().await.burndown.get(&sprint_id).cloned())
    }

    async fn list_by_project(&self, project_id: i64) -> Result<Vec<ProjectBurndown>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<ProjectBurndown> = t
            .burndown
            .values()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.sprint_number);
        Ok(rows)
    }
}

#[async_trait]
impl SprintMetricsRepository for MemoryStore {
    async fn upsert(&self, req: MetricsUpsert) -> Result<SprintMetrics> {
        let mut t = self.tables.lock().await;
        let row = match t.metrics.get(&req.sprint_id).cloned() {
            Some(existing) => SprintMetrics {
                completed_points: req.completed_points,
                velocity: req.velocity,
                stories_completed: req.stories_completed,
                sprint_end: req.sprint_end,
                calculated_at: Utc::now(),
                ..existing
            },
            None => SprintMetrics {
                id: t.id(),
                sprint_id: req.sprint_id,
                project_id: req.project_id,
                team_id: req.team_id,
                committed_points: req.committed_points,
                completed_points: req.completed_points,
                carried_over_points: 0.0,
                velocity: req.velocity,
                stories_completed: req.stories_completed,
                stories_carried_over: 0,
                bugs_fixed: 0,
                impediments_count: 0,
                sprint_start: req.sprint_start,
                sprint_end: req.sprint_end,
                calculated_at: Utc::now(),
            },
        };
        t.metrics.insert(req.sprint_id, row.clone());
        Ok(row)
    }

    async fn get_by_sprint(&self, sprint_id: i64) -> Result<Option<SprintMetrics>> {
        Ok(self.tables.lock().await.metrics.get(&sprint_id).cloned())
    }

    async fn list_by_project(&self, project_id: i64) -> Result<Vec<SprintMetrics>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<SprintMetrics> = t
            .metrics
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.calculated_at
                .cmp(&a.calculated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(rows)
    }
}

#[async_trait]
impl DailyBurndownRepository for MemoryStore {
    async fn replace_for_sprint(&self, sprint_id: i64, mut rows: Vec<DailyBurndown>) -> Result<usize> {
        rows.sort_by_key(|d| d.date);
        let n = rows.len();
        self.tables.lock().await.daily.insert(sprint_id, rows);
        Ok(n)
    }

    async fn list_for_sprint(&self, sprint_id: i64) -> Result<Vec<DailyBurndown>> {
        Ok(self
            .tables
            .lock()
            .await
            .daily
            .get(&sprint_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ActivityRepository for MemoryStore {
    async fn insert(&self, entry: NewActivityLog) -> Result<ActivityLog> {
        let mut t = self.tables.lock().await;
        let row = ActivityLog {
            id: t.id(),
            actor_id: entry.actor_id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            project_id: entry.project_id,
            details: entry.details,
            timestamp: Utc::now(),
        };
        t.activity.push(row.clone());
        Ok(row)
    }

    async fn list_for_project(&self, project_id: i64, limit: i64) -> Result<Vec<ActivityLog>> {
        let t = self.tables.lock().await;
        let rows = t
            .activity
            .iter()
            .filter(|a| a.project_id == Some(project_id))
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }

    async fn list_for_actor(&self, actor_id: i64, limit: i64) -> Result<Vec<ActivityLog>> {
        let t = self.tables.lock().await;
        let rows = t
            .activity
            .iter()
            .filter(|a| a.actor_id == actor_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create(&self, req: NewNotification) -> Result<Notification> {
        let mut t = self.tables.lock().await;
        let row = Notification {
            id: t.id(),
            recipient_id: req.recipient_id,
            notification_type: req.notification_type,
            payload: req.payload,
            read: false,
            created_at: Utc::now(),
            read_at: None,
        };
        t.notifications.push(row.clone());
        Ok(row)
    }

    async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Notification>> {
        let t = self.tables.lock().await;
        let rows = t
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, limit))
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let t = self.tables.lock().await;
        Ok(t
            .notifications
            .iter()
            .filter(|n| n.recipient_id == user_id && !n.read)
            .count() as i64)
    }

    async fn mark_read(&self, id: i64) -> Result<Option<Notification>> {
        let mut t = self.tables.lock().await;
        Ok(t.notifications.iter_mut().find(|n| n.id == id).map(|n| {
            n.read = true;
            n.read_at.get_or_insert_with(Utc::now);
            n.clone()
        }))
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for n in t
            .notifications
            .iter_mut()
            .filter(|n| n.recipient_id == user_id && !n.read)
        {
            n.read = true;
            n.read_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }
}

fn stored(entry: NewLogEntry) -> LogEntry {
    LogEntry {
        id: Uuid::now_v7(),
        timestamp: entry.timestamp,
        log_type: entry.log_type,
        url: entry.url,
        correlation_id: entry.correlation_id,
        application_name: entry.application_name,
        message: entry.message,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl LogRepository for MemoryStore {
    async fn insert(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let row = stored(entry);
        self.tables.lock().await.logs.push(row.clone());
        Ok(row)
    }

    async fn insert_batch(&self, entries: Vec<NewLogEntry>) -> Result<u64> {
        let n = entries.len() as u64;
        let mut t = self.tables.lock().await;
        t.logs.extend(entries.into_iter().map(stored));
        Ok(n)
    }

    async fn list_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<LogEntry> = t
            .logs
            .iter()
            .filter(|l| l.timestamp >= from && l.timestamp <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.timestamp);
        Ok(rows)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let n = t.logs.len() as u64;
        t.logs.clear();
        Ok(n)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.tables.lock().await.logs.len() as i64)
    }
}

#[async_trait]
impl DeadLetterRepository for MemoryStore {
    async fn insert(&self, letter: NewDeadLetter) -> Result<DeadLetter> {
        let mut t = self.tables.lock().await;
        let row = DeadLetter {
            id: t.id(),
            event_id: letter.event_id,
            consumer_group: letter.consumer_group,
            topic: letter.topic,
            action: letter.action,
            payload: letter.payload,
            reason: letter.reason,
            received_at: Utc::now(),
        };
        t.dead_letters.push(row.clone());
        Ok(row)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let t = self.tables.lock().await;
        Ok(newest_first(t.dead_letters.clone(), limit))
    }
}
