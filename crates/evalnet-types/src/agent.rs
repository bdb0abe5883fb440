//! Agent version lifecycle types
//!
//! `AgentStatus::can_transition_to` is the single definition of which status
//! changes are legal. Everything that mutates a version's status consults it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{MinerHotkey, VersionId};

/// Lifecycle status of an agent version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Submitted, waiting for a screener
    AwaitingScreening,
    /// A screener has picked the version up
    Screening,
    /// Passed screening, being scored by validators
    Evaluating,
    /// Accepted and eligible for weights
    Approved,
    /// Failed screening or evaluation
    Rejected,
    /// Administratively banned
    Banned,
}

impl AgentStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [AgentStatus; 6] = [
        AgentStatus::AwaitingScreening,
        AgentStatus::Screening,
        AgentStatus::Evaluating,
        AgentStatus::Approved,
        AgentStatus::Rejected,
        AgentStatus::Banned,
    ];

    /// Whether moving from `self` to `next` is an edge of the lifecycle table.
    ///
    /// Self-transitions are never edges.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (AwaitingScreening, Screening) => true,
            (Screening, Evaluating) | (Screening, Rejected) => true,
            (Evaluating, Approved) | (Evaluating, Rejected) => true,
            (Approved, AwaitingScreening) => true,
            (Banned, _) => false,
            (_, Banned) => true,
            _ => false,
        }
    }

    /// Banned versions never leave that state through the transition API
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Banned)
    }

    /// Whether validators may be handed work for a version in this status
    pub fn is_evaluable(self) -> bool {
        matches!(self, AgentStatus::Screening | AgentStatus::Evaluating)
    }

    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::AwaitingScreening => "awaiting_screening",
            AgentStatus::Screening => "screening",
            AgentStatus::Evaluating => "evaluating",
            AgentStatus::Approved => "approved",
            AgentStatus::Rejected => "rejected",
            AgentStatus::Banned => "banned",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific submitted version of a miner's agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVersion {
    /// Version identifier
    pub version_id: VersionId,
    /// Owning miner
    pub miner_hotkey: MinerHotkey,
    /// Human-readable agent name
    pub agent_name: String,
    /// Monotonic version number within the miner's agent
    pub version_num: u32,
    /// Current lifecycle status
    pub status: AgentStatus,
    /// Submission time; older wins consensus ties
    pub created_at: DateTime<Utc>,
}

impl AgentVersion {
    /// Create a freshly submitted version awaiting screening
    pub fn new(miner_hotkey: MinerHotkey, agent_name: impl Into<String>, version_num: u32) -> Self {
        Self {
            version_id: VersionId::new(),
            miner_hotkey,
            agent_name: agent_name.into(),
            version_num,
            status: AgentStatus::AwaitingScreening,
            created_at: Utc::now(),
        }
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Override the status (for seeding stores)
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}
