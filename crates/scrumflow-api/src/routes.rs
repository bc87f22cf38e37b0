//! Router assembly.

use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::gateway::ws_handler;
use crate::handlers::{activity, dead_letters, health, logs, notifications, reports, sync};
use crate::AppState;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Routes without middleware.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        // Sync triggers
        .route("/sync/sprint/:id", post(sync::sync_sprint))
        .route("/sync/all", post(sync::sync_all))
        .route("/sync/sprint-completion", post(sync::record_sprint_completion))
        // Log store
        .route("/logs", post(logs::download_logs).delete(logs::delete_logs))
        .route("/logs/:from/:to", get(logs::logs_by_range))
        // Reports
        .route("/velocity/team/:team_id", get(reports::team_velocity))
        .route(
            "/velocity/team/:team_id/average",
            get(reports::team_velocity_average),
        )
        .route("/burndown/project/:project_id", get(reports::project_burndown))
        .route("/burndown/sprint/:sprint_id", get(reports::sprint_burndown))
        .route("/sprint-metrics/sprint/:sprint_id", get(reports::sprint_metrics))
        .route(
            "/sprint-metrics/project/:project_id",
            get(reports::project_metrics),
        )
        // Collaboration
        .route("/activity/project/:project_id", get(activity::project_activity))
        .route("/activity/user/:user_id", get(activity::user_activity))
        .route(
            "/notifications/user/:user_id",
            get(notifications::user_notifications),
        )
        .route(
            "/notifications/user/:user_id/unread-count",
            get(notifications::unread_count),
        )
        .route("/notifications/:id/read", patch(notifications::mark_read))
        .route(
            "/notifications/user/:user_id/read-all",
            patch(notifications::mark_all_read),
        )
        .route("/dead-letters", get(dead_letters::list_dead_letters))
        // Push gateway
        .route("/ws", get(ws_handler))
}

/// Full application: routes, tracing, request ids and CORS.
pub fn app(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(Duration::from_secs(3600)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use scrumflow_bus::{InMemoryEventBus, InMemoryLogQueue};
    use scrumflow_core::SprintSnapshot;
    use scrumflow_db::Database;
    use scrumflow_jobs::{LogDrainConfig, SprintSource};

    use super::*;
    use crate::gateway::{Gateway, InMemoryRegistry};

    struct NoSprints;

    #[async_trait]
    impl SprintSource for NoSprints {
        async fn fetch_sprint(&self, _id: i64) -> scrumflow_core::Result<Option<SprintSnapshot>> {
            Ok(None)
        }

        async fn list_sprints(&self) -> scrumflow_core::Result<Vec<SprintSnapshot>> {
            Ok(vec![])
        }
    }

    fn test_app() -> Router {
        let state = AppState::new(
            Database::in_memory(),
            Arc::new(InMemoryEventBus::new()),
            Gateway::new(Arc::new(InMemoryRegistry::new()), None),
            Arc::new(NoSprints),
            Arc::new(InMemoryLogQueue::new()),
            LogDrainConfig::default(),
        );
        app(state, vec![HeaderValue::from_static("http://localhost:4200")])
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cors_allows_listed_origin() {
        let resp = test_app()
            .oneshot(preflight("http://localhost:4200"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:4200"
        );
    }

    #[tokio::test]
    async fn test_cors_ignores_unlisted_origin() {
        let resp = test_app()
            .oneshot(preflight("https://evil.example"))
            .await
            .unwrap();
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_propagated() {
        let req = Request::builder()
            .uri("/health")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap();
        let resp = test_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-123");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = test_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
