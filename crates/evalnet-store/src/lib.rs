//! EvalNet Persistence Contract
//!
//! The coordination core never owns durable state. It talks to storage through
//! [`CoordinationStore`], which a deployment implements on top of its
//! database. [`MemoryStore`] is the in-process reference implementation used
//! by the server binary and by every test in the workspace.
//!
//! # Atomicity requirements
//!
//! - `claim_pending_evaluation` must select and assign in one atomic step:
//!   two concurrent callers never receive the same evaluation.
//! - `set_version_status` either commits or returns an error; callers only
//!   publish a transition after it returns `Ok`.
//! - `get_top_agent_scores` returns one consistent snapshot.

pub mod error;
pub mod memory;

use async_trait::async_trait;
use evalnet_types::{
    AgentStatus, AgentVersion, Evaluation, EvaluationId, MinerHotkey, ScoredVersion,
    ValidatorHotkey, VersionId,
};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

/// Storage operations the coordination core depends on
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Look up one version
    async fn get_agent_version(&self, version_id: &VersionId) -> StoreResult<Option<AgentVersion>>;

    /// Every version currently in `status`
    async fn list_versions_by_status(&self, status: AgentStatus) -> StoreResult<Vec<AgentVersion>>;

    /// Every version owned by `miner`
    async fn list_versions_by_miner(&self, miner: &MinerHotkey) -> StoreResult<Vec<AgentVersion>>;

    /// Persist a new status for a version
    async fn set_version_status(&self, version_id: &VersionId, status: AgentStatus) -> StoreResult<()>;

    /// Atomically pick the oldest evaluation `validator` may take and assign it
    async fn claim_pending_evaluation(&self, validator: &ValidatorHotkey) -> StoreResult<Option<Evaluation>>;

    /// Record the score for an evaluation assigned to `validator`
    async fn complete_evaluation(
        &self,
        evaluation_id: &EvaluationId,
        validator: &ValidatorHotkey,
        score: f64,
    ) -> StoreResult<Evaluation>;

    /// All validator scores for approved versions, joined with version facts
    async fn get_top_agent_scores(&self) -> StoreResult<Vec<ScoredVersion>>;
}
