//! Evaluation work items, validator scores and the consensus output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{EvaluationId, MinerHotkey, ValidatorHotkey, VersionId};

/// Completion state of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    /// Created by the scheduler, not yet handed out
    Pending,
    /// Handed to exactly one validator
    Assigned,
    /// Scored
    Complete,
}

/// One unit of scoring work for one agent version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Evaluation identifier
    pub evaluation_id: EvaluationId,
    /// Version being scored
    pub version_id: VersionId,
    /// Validator the scheduler earmarked this work for, if any
    pub target_validator: Option<ValidatorHotkey>,
    /// Validator the work was handed to
    pub assigned_to: Option<ValidatorHotkey>,
    /// Completion state
    pub state: EvaluationState,
    /// Score, once complete
    pub score: Option<f64>,
    /// Creation time; oldest pending work is dispatched first
    pub created_at: DateTime<Utc>,
    /// Time of assignment
    pub assigned_at: Option<DateTime<Utc>>,
    /// Time of completion
    pub finished_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// Create an untargeted pending evaluation
    pub fn pending(version_id: VersionId) -> Self {
        Self {
            evaluation_id: EvaluationId::new(),
            version_id,
            target_validator: None,
            assigned_to: None,
            state: EvaluationState::Pending,
            score: None,
            created_at: Utc::now(),
            assigned_at: None,
            finished_at: None,
        }
    }

    /// Earmark the evaluation for one validator
    pub fn targeted_at(mut self, validator: ValidatorHotkey) -> Self {
        self.target_validator = Some(validator);
        self
    }

    /// Override the creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether `validator` may be handed this evaluation
    pub fn is_claimable_by(&self, validator: &ValidatorHotkey) -> bool {
        self.state == EvaluationState::Pending
            && self.assigned_to.is_none()
            && self
                .target_validator
                .as_ref()
                .map_or(true, |target| target == validator)
    }
}

/// A score one validator recorded for one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorScore {
    /// Scored version
    pub version_id: VersionId,
    /// Validator that produced the score
    pub validator_hotkey: ValidatorHotkey,
    /// Score in [0, 1]
    pub score: f64,
    /// When the score was recorded
    pub scored_at: DateTime<Utc>,
}

/// A validator score joined with the facts consensus needs about its version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredVersion {
    /// Scored version
    pub version_id: VersionId,
    /// Owning miner
    pub miner_hotkey: MinerHotkey,
    /// Version submission time
    pub created_at: DateTime<Utc>,
    /// Validator that produced the score
    pub validator_hotkey: ValidatorHotkey,
    /// Score value
    pub score: f64,
    /// When the score was recorded
    pub scored_at: DateTime<Utc>,
}

/// The canonical best agent, as decided by consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopAgentRecord {
    /// Owning miner
    pub miner_hotkey: MinerHotkey,
    /// Winning version
    pub version_id: VersionId,
    /// Aggregate score the decision was based on
    pub avg_score: f64,
}
