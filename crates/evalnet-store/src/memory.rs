//! In-memory store
//!
//! All state lives behind one `RwLock`, so every trait method observes and
//! mutates a single consistent snapshot. The lock is never held across an
//! await point.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use evalnet_types::{
    AgentStatus, AgentVersion, Evaluation, EvaluationId, EvaluationState, MinerHotkey,
    ScoredVersion, ValidatorHotkey, ValidatorScore, VersionId,
};

use crate::{CoordinationStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    versions: HashMap<VersionId, AgentVersion>,
    evaluations: HashMap<EvaluationId, Evaluation>,
    scores: Vec<ValidatorScore>,
}

/// Reference [`CoordinationStore`] backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a version
    pub fn insert_version(&self, version: AgentVersion) {
        self.inner.write().versions.insert(version.version_id, version);
    }

    /// Insert or replace an evaluation
    pub fn insert_evaluation(&self, evaluation: Evaluation) {
        self.inner
            .write()
            .evaluations
            .insert(evaluation.evaluation_id, evaluation);
    }

    /// Record a raw validator score, bypassing the evaluation flow
    pub fn record_score(&self, score: ValidatorScore) {
        self.inner.write().scores.push(score);
    }

    /// Snapshot of one evaluation
    pub fn evaluation(&self, evaluation_id: &EvaluationId) -> Option<Evaluation> {
        self.inner.read().evaluations.get(evaluation_id).cloned()
    }

    /// Snapshot of one version
    pub fn version(&self, version_id: &VersionId) -> Option<AgentVersion> {
        self.inner.read().versions.get(version_id).cloned()
    }

    /// Snapshot of every version
    pub fn versions(&self) -> Vec<AgentVersion> {
        self.inner.read().versions.values().cloned().collect()
    }
}

fn validate_score(score: f64) -> StoreResult<()> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(StoreError::InvalidInput(format!("score {} outside [0, 1]", score)))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_agent_version(&self, version_id: &VersionId) -> StoreResult<Option<AgentVersion>> {
        Ok(self.inner.read().versions.get(version_id).cloned())
    }

    async fn list_versions_by_status(&self, status: AgentStatus) -> StoreResult<Vec<AgentVersion>> {
        let inner = self.inner.read();
        let mut versions: Vec<AgentVersion> = inner
            .versions
            .values()
            .filter(|v| v.status == status)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(versions)
    }

    async fn list_versions_by_miner(&self, miner: &MinerHotkey) -> StoreResult<Vec<AgentVersion>> {
        let inner = self.inner.read();
        let mut versions: Vec<AgentVersion> = inner
            .versions
            .values()
            .filter(|v| &v.miner_hotkey == miner)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_num);
        Ok(versions)
    }

    async fn set_version_status(&self, version_id: &VersionId, status: AgentStatus) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let version = inner
            .versions
            .get_mut(version_id)
            .ok_or_else(|| StoreError::NotFound(format!("version {}", version_id)))?;
        version.status = status;
        Ok(())
    }

    async fn claim_pending_evaluation(&self, validator: &ValidatorHotkey) -> StoreResult<Option<Evaluation>> {
        let mut inner = self.inner.write();
        let Inner {
            versions,
            evaluations,
            ..
        } = &mut *inner;

        // A validator scores each version at most once.
        let already_held: Vec<VersionId> = evaluations
            .values()
            .filter(|e| e.assigned_to.as_ref() == Some(validator))
            .map(|e| e.version_id)
            .collect();

        let candidate = evaluations
            .values()
            .filter(|e| e.is_claimable_by(validator))
            .filter(|e| !already_held.contains(&e.version_id))
            .filter(|e| {
                versions
                    .get(&e.version_id)
                    .map_or(true, |v| v.status.is_evaluable())
            })
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.evaluation_id.cmp(&b.evaluation_id))
            })
            .map(|e| e.evaluation_id);

        let Some(evaluation_id) = candidate else {
            return Ok(None);
        };

        let evaluation = evaluations
            .get_mut(&evaluation_id)
            .ok_or_else(|| StoreError::NotFound(format!("evaluation {}", evaluation_id)))?;
        evaluation.state = EvaluationState::Assigned;
        evaluation.assigned_to = Some(validator.clone());
        evaluation.assigned_at = Some(Utc::now());

        debug!(evaluation_id = %evaluation_id, validator = %validator, "Evaluation claimed");
        Ok(Some(evaluation.clone()))
    }

    async fn complete_evaluation(
        &self,
        evaluation_id: &EvaluationId,
        validator: &ValidatorHotkey,
        score: f64,
    ) -> StoreResult<Evaluation> {
        validate_score(score)?;

        let mut inner = self.inner.write();
        let evaluation = inner
            .evaluations
            .get_mut(evaluation_id)
            .ok_or_else(|| StoreError::NotFound(format!("evaluation {}", evaluation_id)))?;

        if evaluation.assigned_to.as_ref() != Some(validator) {
            return Err(StoreError::NotFound(format!(
                "evaluation {} assigned to {}",
                evaluation_id, validator
            )));
        }
        if evaluation.state != EvaluationState::Assigned {
            return Err(StoreError::Conflict(format!(
                "evaluation {} is {:?}",
                evaluation_id, evaluation.state
            )));
        }

        let now = Utc::now();
        evaluation.state = EvaluationState::Complete;
        evaluation.score = Some(score);
        evaluation.finished_at = Some(now);
        let completed = evaluation.clone();

        inner.scores.push(ValidatorScore {
            version_id: completed.version_id,
            validator_hotkey: validator.clone(),
            score,
            scored_at: now,
        });

        Ok(completed)
    }

    async fn get_top_agent_scores(&self) -> StoreResult<Vec<ScoredVersion>> {
        let inner = self.inner.read();
        let rows = inner
            .scores
            .iter()
            .filter_map(|s| {
                let version = inner.versions.get(&s.version_id)?;
                (version.status == AgentStatus::Approved).then(|| ScoredVersion {
                    version_id: version.version_id,
                    miner_hotkey: version.miner_hotkey.clone(),
                    created_at: version.created_at,
                    validator_hotkey: s.validator_hotkey.clone(),
                    score: s.score,
                    scored_at: s.scored_at,
                })
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn evaluating_version(miner: &str) -> AgentVersion {
        AgentVersion::new(MinerHotkey::new(miner), "agent", 1).with_status(AgentStatus::Evaluating)
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let store = MemoryStore::new();
        let version = evaluating_version("m1");
        let other = evaluating_version("m2");
        store.insert_version(version.clone());
        store.insert_version(other.clone());

        let now = Utc::now();
        let newer = Evaluation::pending(version.version_id).with_created_at(now);
        let older = Evaluation::pending(other.version_id).with_created_at(now - Duration::minutes(5));
        store.insert_evaluation(newer.clone());
        store.insert_evaluation(older.clone());

        let validator = ValidatorHotkey::new("v1");
        let claimed = store.claim_pending_evaluation(&validator).await.unwrap().unwrap();
        assert_eq!(claimed.evaluation_id, older.evaluation_id);
        assert_eq!(claimed.state, EvaluationState::Assigned);
        assert_eq!(claimed.assigned_to, Some(validator));
    }

    #[tokio::test]
    async fn test_claim_skips_non_evaluable_versions() {
        let store = MemoryStore::new();
        let version = evaluating_version("m1").with_status(AgentStatus::Banned);
        store.insert_version(version.clone());
        store.insert_evaluation(Evaluation::pending(version.version_id));

        let claimed = store.claim_pending_evaluation(&ValidatorHotkey::new("v1")).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_validator_scores_version_once() {
        let store = MemoryStore::new();
        let version = evaluating_version("m1");
        store.insert_version(version.clone());
        store.insert_evaluation(Evaluation::pending(version.version_id));
        store.insert_evaluation(Evaluation::pending(version.version_id));

        let v1 = ValidatorHotkey::new("v1");
        let v2 = ValidatorHotkey::new("v2");
        assert!(store.claim_pending_evaluation(&v1).await.unwrap().is_some());
        assert!(store.claim_pending_evaluation(&v1).await.unwrap().is_none());
        assert!(store.claim_pending_evaluation(&v2).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let version = evaluating_version("m1");
        store.insert_version(version.clone());
        store.insert_evaluation(Evaluation::pending(version.version_id));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .claim_pending_evaluation(&ValidatorHotkey::new(format!("v{}", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_complete_requires_assignee() {
        let store = MemoryStore::new();
        let version = evaluating_version("m1");
        store.insert_version(version.clone());
        let evaluation = Evaluation::pending(version.version_id);
        store.insert_evaluation(evaluation.clone());

        let v1 = ValidatorHotkey::new("v1");
        store.claim_pending_evaluation(&v1).await.unwrap();

        let err = store
            .complete_evaluation(&evaluation.evaluation_id, &ValidatorHotkey::new("v2"), 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let done = store
            .complete_evaluation(&evaluation.evaluation_id, &v1, 0.5)
            .await
            .unwrap();
        assert_eq!(done.state, EvaluationState::Complete);
        assert_eq!(done.score, Some(0.5));

        let err = store
            .complete_evaluation(&evaluation.evaluation_id, &v1, 0.6)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_range_score() {
        let store = MemoryStore::new();
        let err = store
            .complete_evaluation(&EvaluationId::new(), &ValidatorHotkey::new("v1"), f64::NAN)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_top_agent_scores_only_approved() {
        let store = MemoryStore::new();
        let approved = evaluating_version("m1").with_status(AgentStatus::Approved);
        let evaluating = evaluating_version("m2");
        store.insert_version(approved.clone());
        store.insert_version(evaluating.clone());

        for version in [&approved, &evaluating] {
            store.record_score(ValidatorScore {
                version_id: version.version_id,
                validator_hotkey: ValidatorHotkey::new("v1"),
                score: 0.8,
                scored_at: Utc::now(),
            });
        }

        let rows = store.get_top_agent_scores().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version_id, approved.version_id);
        assert_eq!(rows[0].miner_hotkey, approved.miner_hotkey);
    }

    #[tokio::test]
    async fn test_set_status_missing_version() {
        let store = MemoryStore::new();
        let err = store
            .set_version_status(&VersionId::new(), AgentStatus::Banned)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
