//! Validator websocket protocol
//!
//! ## Requests
//! ```json
//! { "op": "get-next-evaluation" }
//! { "op": "finish-evaluation", "evaluation_id": "…", "score": 0.91 }
//! ```
//!
//! ## Events
//! ```json
//! { "event": "evaluation" }
//! { "event": "evaluation", "evaluation_id": "…", "agent_version": { … } | null }
//! { "event": "evaluation-recorded", "evaluation_id": "…" }
//! { "event": "set-weights", "miner_hotkey": "…", "version_id": "…", "avg_score": 0.93 }
//! { "event": "error", "message": "…" }
//! ```

use serde::{Deserialize, Serialize};

use crate::agent::AgentVersion;
use crate::evaluation::TopAgentRecord;
use crate::identity::EvaluationId;

/// Messages a validator sends to the coordinator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ValidatorRequest {
    /// Ask for the next unit of work
    GetNextEvaluation,
    /// Report the score for an assigned evaluation
    FinishEvaluation {
        evaluation_id: EvaluationId,
        score: f64,
    },
}

/// A dispatched evaluation with its resolved payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationAssignment {
    /// Assigned evaluation
    pub evaluation_id: EvaluationId,
    /// Resolved version, or `None` when the version record is missing
    pub agent_version: Option<AgentVersion>,
}

/// Messages the coordinator sends to a validator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Answer to `get-next-evaluation`; no fields when nothing is available
    Evaluation {
        #[serde(flatten)]
        assignment: Option<EvaluationAssignment>,
    },
    /// Acknowledgement of `finish-evaluation`
    EvaluationRecorded { evaluation_id: EvaluationId },
    /// Pushed by the weight broadcast loop
    SetWeights(TopAgentRecord),
    /// Request could not be served
    Error { message: String },
}

impl ServerEvent {
    /// "Nothing to do" answer
    pub fn no_evaluation() -> Self {
        ServerEvent::Evaluation { assignment: None }
    }

    /// Error event with a client-facing message
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Evaluation { .. } => "evaluation",
            ServerEvent::EvaluationRecorded { .. } => "evaluation-recorded",
            ServerEvent::SetWeights(_) => "set-weights",
            ServerEvent::Error { .. } => "error",
        }
    }
}

impl From<Option<EvaluationAssignment>> for ServerEvent {
    fn from(assignment: Option<EvaluationAssignment>) -> Self {
        ServerEvent::Evaluation { assignment }
    }
}
