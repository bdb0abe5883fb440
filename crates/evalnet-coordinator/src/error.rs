//! Coordination error types

use evalnet_store::StoreError;
use evalnet_types::{AgentStatus, ValidatorHotkey, VersionId};
use thiserror::Error;

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Coordination errors
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    /// Referenced version, agent or evaluation is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// State machine rule violation; state is unchanged
    #[error("Invalid transition for version {version_id}: {from} -> {to}")]
    InvalidTransition {
        version_id: VersionId,
        from: AgentStatus,
        to: AgentStatus,
    },

    /// Request conflicts with the current state of a record
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request carried an unusable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No live channel for the validator
    #[error("Validator {0} is not connected")]
    NotConnected(ValidatorHotkey),

    /// The validator's outbound queue is full
    #[error("Outbound queue for validator {0} is full")]
    ChannelFull(ValidatorHotkey),

    /// No version qualifies for consensus
    #[error("No version qualifies for consensus")]
    ConsensusUnavailable,

    /// Persistence-layer call failed
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),
}

impl CoordinationError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinationError::UpstreamFailure(_) | CoordinationError::ChannelFull(_)
        )
    }
}

impl From<StoreError> for CoordinationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CoordinationError::NotFound(what),
            StoreError::Conflict(what) => CoordinationError::Conflict(what),
            StoreError::InvalidInput(what) => CoordinationError::InvalidInput(what),
            other => CoordinationError::UpstreamFailure(other.to_string()),
        }
    }
}
