//! Evaluation work dispatch

use std::sync::Arc;

use tracing::{debug, error, info};

use evalnet_store::CoordinationStore;
use evalnet_types::{Evaluation, EvaluationAssignment, EvaluationId, ValidatorHotkey};

use crate::error::CoordinationResult;

/// Hands validators their next evaluation and records their scores
pub struct EvaluationDispatcher {
    store: Arc<dyn CoordinationStore>,
}

impl EvaluationDispatcher {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Claim the oldest evaluation `validator` may take.
    ///
    /// `Ok(None)` means there is nothing to do. The claim itself is atomic in
    /// the store, so concurrent callers never share an evaluation. A claimed
    /// evaluation whose version cannot be resolved is still returned, with an
    /// empty payload.
    pub async fn next_evaluation(
        &self,
        validator: &ValidatorHotkey,
    ) -> CoordinationResult<Option<EvaluationAssignment>> {
        let evaluation = match self.store.claim_pending_evaluation(validator).await {
            Ok(Some(evaluation)) => evaluation,
            Ok(None) => {
                debug!(validator = %validator, "No evaluation available");
                return Ok(None);
            }
            Err(e) => {
                error!(validator = %validator, error = %e, "Failed to claim evaluation");
                return Err(e.into());
            }
        };

        let agent_version = match self.store.get_agent_version(&evaluation.version_id).await {
            Ok(Some(version)) => Some(version),
            Ok(None) => {
                error!(
                    evaluation_id = %evaluation.evaluation_id,
                    version_id = %evaluation.version_id,
                    "Assigned evaluation references a missing version"
                );
                None
            }
            Err(e) => {
                error!(
                    evaluation_id = %evaluation.evaluation_id,
                    version_id = %evaluation.version_id,
                    error = %e,
                    "Failed to resolve version for assigned evaluation"
                );
                None
            }
        };

        info!(
            validator = %validator,
            evaluation_id = %evaluation.evaluation_id,
            version_id = %evaluation.version_id,
            "Evaluation dispatched"
        );

        Ok(Some(EvaluationAssignment {
            evaluation_id: evaluation.evaluation_id,
            agent_version,
        }))
    }

    /// Record `score` for an evaluation previously handed to `validator`
    pub async fn complete_evaluation(
        &self,
        validator: &ValidatorHotkey,
        evaluation_id: &EvaluationId,
        score: f64,
    ) -> CoordinationResult<Evaluation> {
        let evaluation = self
            .store
            .complete_evaluation(evaluation_id, validator, score)
            .await?;

        info!(
            validator = %validator,
            evaluation_id = %evaluation_id,
            version_id = %evaluation.version_id,
            score,
            "Evaluation recorded"
        );
        Ok(evaluation)
    }
}
