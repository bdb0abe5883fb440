//! API Routes

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;
use crate::websocket;

/// Administrative scoring routes
pub fn scoring_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/check-top-agent", get(handlers::scoring::check_top_agent))
        .route("/ban-agent", post(handlers::scoring::ban_agent))
        .route("/approve-version", post(handlers::scoring::approve_version))
        .route("/trigger-weight-update", post(handlers::scoring::trigger_weight_update))
        .route("/re-eval-approved", post(handlers::scoring::re_eval_approved))
}

/// Validator socket route
pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(websocket::validator_ws_handler))
}
