//! Agent version lifecycle
//!
//! Every status change goes through [`AgentStateMachine`]. Transitions on the
//! same version are serialized by a per-version async mutex; transitions on
//! different versions run concurrently. A transition is published only after
//! the store accepted the write, so a failed write leaves no trace.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use evalnet_store::CoordinationStore;
use evalnet_types::{AgentStatus, AgentVersion, MinerHotkey, VersionId};

use crate::error::{CoordinationError, CoordinationResult};

const TRANSITION_EVENT_CAPACITY: usize = 256;

/// A committed status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub version_id: VersionId,
    pub from: AgentStatus,
    pub to: AgentStatus,
    pub at: DateTime<Utc>,
}

/// Serialized lifecycle transitions for agent versions
pub struct AgentStateMachine {
    store: Arc<dyn CoordinationStore>,
    locks: DashMap<VersionId, Arc<Mutex<()>>>,
    events: broadcast::Sender<TransitionEvent>,
}

impl AgentStateMachine {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        let (events, _) = broadcast::channel(TRANSITION_EVENT_CAPACITY);
        Self {
            store,
            locks: DashMap::new(),
            events,
        }
    }

    /// Receive every transition committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// `awaiting_screening -> screening`
    pub async fn start_screening(&self, version_id: &VersionId) -> CoordinationResult<AgentVersion> {
        self.transition(version_id, AgentStatus::Screening).await
    }

    /// `screening -> evaluating` when `passed`, else `screening -> rejected`
    pub async fn finish_screening(
        &self,
        version_id: &VersionId,
        passed: bool,
    ) -> CoordinationResult<AgentVersion> {
        let to = if passed {
            AgentStatus::Evaluating
        } else {
            AgentStatus::Rejected
        };
        self.transition(version_id, to).await
    }

    /// `evaluating -> approved` when `accepted`, else `evaluating -> rejected`
    pub async fn finish_evaluation(
        &self,
        version_id: &VersionId,
        accepted: bool,
    ) -> CoordinationResult<AgentVersion> {
        let to = if accepted {
            AgentStatus::Approved
        } else {
            AgentStatus::Rejected
        };
        self.transition(version_id, to).await
    }

    /// Approve an evaluating version. Approving an approved version succeeds
    /// without a new transition.
    pub async fn approve_version(&self, version_id: &VersionId) -> CoordinationResult<AgentVersion> {
        let _guard = self.lock_version(version_id).await;

        let version = self.load(version_id).await?;
        if version.status == AgentStatus::Approved {
            return Ok(version);
        }
        self.commit(version, AgentStatus::Approved).await
    }

    /// Ban every version owned by `miner`.
    ///
    /// Returns the ids of the versions that changed; versions already banned
    /// are left alone. Fails with `NotFound` when the miner has no versions.
    pub async fn ban_agent(&self, miner: &MinerHotkey) -> CoordinationResult<Vec<VersionId>> {
        let versions = self.store.list_versions_by_miner(miner).await?;
        if versions.is_empty() {
            return Err(CoordinationError::NotFound(format!("agent {}", miner)));
        }

        let mut banned = Vec::new();
        for listed in versions {
            let _guard = self.lock_version(&listed.version_id).await;

            // Re-read under the lock; the listing may be stale.
            let version = self.load(&listed.version_id).await?;
            if version.status == AgentStatus::Banned {
                continue;
            }
            let version = self.commit(version, AgentStatus::Banned).await?;
            banned.push(version.version_id);
        }

        info!(miner = %miner, banned = banned.len(), "Agent banned");
        Ok(banned)
    }

    /// Send every approved version back to `awaiting_screening`.
    ///
    /// Each version moves under its own lock. A version whose write fails is
    /// logged and left approved; the rest still move.
    pub async fn re_evaluate_approved_agents(&self) -> CoordinationResult<Vec<AgentVersion>> {
        let approved = self.store.list_versions_by_status(AgentStatus::Approved).await?;

        let mut moved = Vec::with_capacity(approved.len());
        for listed in approved {
            let _guard = self.lock_version(&listed.version_id).await;

            let version = match self.store.get_agent_version(&listed.version_id).await {
                Ok(Some(version)) if version.status == AgentStatus::Approved => version,
                Ok(_) => continue,
                Err(e) => {
                    warn!(version_id = %listed.version_id, error = %e, "Skipping re-evaluation");
                    continue;
                }
            };

            match self.commit(version, AgentStatus::AwaitingScreening).await {
                Ok(version) => moved.push(version),
                Err(e) => {
                    warn!(version_id = %listed.version_id, error = %e, "Skipping re-evaluation");
                }
            }
        }

        info!(count = moved.len(), "Approved agents queued for re-evaluation");
        Ok(moved)
    }

    async fn transition(&self, version_id: &VersionId, to: AgentStatus) -> CoordinationResult<AgentVersion> {
        let _guard = self.lock_version(version_id).await;

        let version = self.load(version_id).await?;
        self.commit(version, to).await
    }

    async fn lock_version(&self, version_id: &VersionId) -> VersionLock<'_> {
        let lock = self
            .locks
            .entry(*version_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        VersionLock {
            locks: &self.locks,
            version_id: *version_id,
            guard: Some(guard),
        }
    }

    async fn load(&self, version_id: &VersionId) -> CoordinationResult<AgentVersion> {
        self.store
            .get_agent_version(version_id)
            .await?
            .ok_or_else(|| CoordinationError::NotFound(format!("version {}", version_id)))
    }

    /// Caller must hold the version's lock.
    async fn commit(&self, mut version: AgentVersion, to: AgentStatus) -> CoordinationResult<AgentVersion> {
        let from = version.status;
        if !from.can_transition_to(to) {
            return Err(CoordinationError::InvalidTransition {
                version_id: version.version_id,
                from,
                to,
            });
        }

        self.store.set_version_status(&version.version_id, to).await?;
        version.status = to;

        info!(version_id = %version.version_id, from = %from, to = %to, "Version transitioned");
        // No subscribers is fine.
        let _ = self.events.send(TransitionEvent {
            version_id: version.version_id,
            from,
            to,
            at: Utc::now(),
        });

        Ok(version)
    }
}

/// Held for the duration of one version's transition. The lock entry is
/// dropped from the map once nobody else holds or waits on it.
struct VersionLock<'a> {
    locks: &'a DashMap<VersionId, Arc<Mutex<()>>>,
    version_id: VersionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VersionLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.version_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
