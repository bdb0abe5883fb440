//! Health Check Handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use evalnet_coordinator::BroadcastRecord;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Validator wire schema version
    pub protocol_version: &'static str,
    /// Timestamp (ms)
    pub timestamp: i64,
    /// Validators with a live connection
    pub connected_validators: usize,
    /// Whether the weight broadcast loop is running
    pub broadcast_loop_running: bool,
    /// Most recent weight broadcast
    pub last_broadcast: Option<BroadcastRecord>,
}

/// Health check endpoint
///
/// Always 200 while the process serves requests.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: evalnet_types::PROTOCOL_VERSION,
        timestamp: Utc::now().timestamp_millis(),
        connected_validators: coordinator.registry().len(),
        broadcast_loop_running: coordinator.is_running(),
        last_broadcast: coordinator.broadcaster().last_broadcast(),
    })
}
