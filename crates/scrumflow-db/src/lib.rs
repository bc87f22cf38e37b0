//! # scrumflow-db
//!
//! Storage layer for the scrumflow pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for every core storage trait
//! - An in-memory backend with the same behavior for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrumflow_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/scrumflow").await?;
//!     let history = db.velocity.list_by_team(3).await?;
//!     println!("{} sprints", history.len());
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

pub mod activity;
pub mod burndown;
pub mod daily_burndown;
pub mod dead_letters;
pub mod logs;
pub mod memory;
pub mod metrics;
pub mod notifications;
pub mod pool;
pub mod velocity;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use scrumflow_core::*;

pub use activity::PgActivityRepository;
pub use burndown::PgBurndownRepository;
pub use daily_burndown::PgDailyBurndownRepository;
pub use dead_letters::PgDeadLetterRepository;
pub use logs::PgLogRepository;
pub use memory::MemoryStore;
pub use metrics::PgSprintMetricsRepository;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use velocity::PgVelocityRepository;

/// Combined storage context with all repositories.
///
/// Repositories are trait objects so consumers never care whether they run
/// against PostgreSQL or the in-memory store.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool; `None` for the in-memory backend.
    pub pool: Option<sqlx::Pool<sqlx::Postgres>>,
    pub velocity: Arc<dyn VelocityRepository>,
    pub burndown: Arc<dyn BurndownRepository>,
    pub metrics: Arc<dyn SprintMetricsRepository>,
    pub daily_burndown: Arc<dyn DailyBurndownRepository>,
    pub activity: Arc<dyn ActivityRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub logs: Arc<dyn LogRepository>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            velocity: Arc::new(PgVelocityRepository::new(pool.clone())),
            burndown: Arc::new(PgBurndownRepository::new(pool.clone())),
            metrics: Arc::new(PgSprintMetricsRepository::new(pool.clone())),
            daily_burndown: Arc::new(PgDailyBurndownRepository::new(pool.clone())),
            activity: Arc::new(PgActivityRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            logs: Arc::new(PgLogRepository::new(pool.clone())),
            dead_letters: Arc::new(PgDeadLetterRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Database backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    /// Database backed by a shared [`MemoryStore`], so tests can inspect it.
    pub fn from_store(store: Arc<MemoryStore>) -> Self {
        Self {
            pool: None,
            velocity: store.clone(),
            burndown: store.clone(),
            metrics: store.clone(),
            daily_burndown: store.clone(),
            activity: store.clone(),
            notifications: store.clone(),
            logs: store.clone(),
            dead_letters: store,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations. A no-op for the in-memory backend.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            sqlx::migrate!("../../migrations")
                .run(pool)
                .await
                .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        }
        Ok(())
    }

    /// Get the underlying connection pool, if any.
    pub fn pool(&self) -> Option<&sqlx::Pool<sqlx::Postgres>> {
        self.pool.as_ref()
    }

    /// Round-trip check used by the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map_err(Error::Database)?;
            log_pool_metrics(pool);
        }
        Ok(())
    }
}
