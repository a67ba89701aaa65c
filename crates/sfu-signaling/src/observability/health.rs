//! Health endpoints.
//!
//! - `GET /health` - liveness, 200 while the process runs
//! - `GET /ready` - readiness, 200 once the media engine router exists and
//!   until shutdown begins
//!
//! `/metrics` is served alongside these by the server module.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    /// Router bootstrapped, sessions can be served.
    router_ready: AtomicBool,
    /// Shutdown started; no new sessions.
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, not yet ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            router_ready: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    /// Mark the media engine router as created.
    pub fn set_ready(&self) {
        self.router_ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as shutting down.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.router_ready.load(Ordering::SeqCst) && !self.is_draining()
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_lifecycle() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready(), "Not ready before router bootstrap");

        state.set_ready();
        assert!(state.is_ready());

        state.set_draining();
        assert!(!state.is_ready(), "Draining service is not ready");
        assert!(state.is_live(), "Draining service stays live");
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(get_status(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_endpoint_follows_state() {
        let state = Arc::new(HealthState::new());

        let app = health_router(Arc::clone(&state));
        assert_eq!(
            get_status(app, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        let app = health_router(Arc::clone(&state));
        assert_eq!(get_status(app, "/ready").await, StatusCode::OK);

        state.set_draining();
        let app = health_router(state);
        assert_eq!(
            get_status(app, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(get_status(app, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
