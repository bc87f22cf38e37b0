//! HTTP handlers for scrumflow-api.

pub mod activity;
pub mod dead_letters;
pub mod health;
pub mod logs;
pub mod notifications;
pub mod reports;
pub mod sync;

use serde::Deserialize;

use scrumflow_core::defaults::{PAGE_LIMIT, PAGE_LIMIT_MAX};

/// `?limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    /// Requested limit clamped to `1..=PAGE_LIMIT_MAX`, default `PAGE_LIMIT`.
    pub fn resolve(&self) -> i64 {
        self.limit.unwrap_or(PAGE_LIMIT).clamp(1, PAGE_LIMIT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_resolve() {
        assert_eq!(LimitQuery::default().resolve(), PAGE_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.resolve(), 1);
        assert_eq!(LimitQuery { limit: Some(10) }.resolve(), 10);
        assert_eq!(LimitQuery { limit: Some(100_000) }.resolve(), PAGE_LIMIT_MAX);
    }
}
