//! HTTP surface: job lifecycle, document CRUD, presentation, and plan
//! synthesis routes, mounted on one axum router. Mirrors the shape of
//! `src/factory/server.rs` / `src/factory/api.rs` — a single `AppState`,
//! a uniform `ApiError` → `IntoResponse`, and feature routers merged onto
//! one `Router<SharedState>` — generalized from the issue-board domain to
//! the job/document/presentation domain.

mod documents;
mod errors;
mod jobs;
mod orchestrator;
mod presenter;
mod state;

pub use errors::ApiError;
pub use state::{AppState, SharedState};

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Builds the full application router. `with_state` is applied last so
/// every feature router shares one `SharedState`.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(jobs::router())
        .merge(documents::router())
        .merge(presenter::router())
        .merge(orchestrator::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        state::test_support::in_memory_state()
    }

    #[tokio::test]
    async fn health_route_responds_ok() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
