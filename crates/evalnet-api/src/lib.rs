//! EvalNet API
//!
//! HTTP and websocket surface of the coordination service.
//!
//! # API Structure
//!
//! ```text
//! /
//! ├── /health                          - Liveness plus coordinator status
//! ├── /ws?validator_hotkey=...         - Validator socket
//! └── /scoring
//!     ├── GET  /check-top-agent        - Current consensus winner
//!     ├── POST /ban-agent              - Ban every version of an agent (ban password)
//!     ├── POST /approve-version        - Approve an evaluated version (approval password)
//!     ├── POST /trigger-weight-update  - Broadcast weights now
//!     └── POST /re-eval-approved       - Re-screen approved versions (approval password)
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use auth::AdminCredentials;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::AppState;

/// API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
    /// Enable request tracing
    pub enable_tracing: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            enable_tracing: true,
        }
    }
}

/// Create the main router with all middleware
pub fn create_router(state: Arc<AppState>, config: ApiConfig) -> Router {
    let mut router = create_test_router(state);

    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ));
    }

    if config.enable_cors {
        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(
                    config
                        .cors_origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}

/// Create a router without middleware
pub fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", axum::routing::get(handlers::health::health_check))
        .nest("/scoring", routes::scoring_routes())
        .merge(routes::ws_routes())
        .with_state(state)
}
