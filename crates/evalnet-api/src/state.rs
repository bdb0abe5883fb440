//! Application state shared across handlers

use std::sync::Arc;

use evalnet_coordinator::Coordinator;

use crate::auth::AdminCredentials;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Coordination service
    pub coordinator: Arc<Coordinator>,
    /// Administrative secrets
    pub admin: AdminCredentials,
}

impl AppState {
    /// Create a new application state
    pub fn new(coordinator: Arc<Coordinator>, admin: AdminCredentials) -> Self {
        Self { coordinator, admin }
    }
}
