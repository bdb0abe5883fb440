//! Top agent consensus
//!
//! [`ConsensusEngine`] reads one snapshot of validator scores and hands it to
//! a [`SelectionPolicy`]. The default policy, [`ThresholdOldestPolicy`]:
//!
//! 1. keeps the latest score per (version, validator),
//! 2. drops versions scored by fewer than `min_validators` validators,
//! 3. averages the remaining scores per version,
//! 4. keeps every version within `tolerance` (relative) of the best average,
//! 5. picks the oldest of those.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use evalnet_store::CoordinationStore;
use evalnet_types::{MinerHotkey, ScoredVersion, TopAgentRecord, ValidatorHotkey, VersionId};

use crate::error::CoordinationResult;

/// Default number of distinct validators a version needs
pub const DEFAULT_MIN_VALIDATORS: usize = 2;

/// Default relative band around the best aggregate score
pub const DEFAULT_TOLERANCE: f64 = 0.03;

/// Consensus parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Distinct validators required before a version is considered
    #[serde(default = "default_min_validators")]
    pub min_validators: usize,
    /// Relative distance from the best score that still counts as a tie
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_min_validators() -> usize {
    DEFAULT_MIN_VALIDATORS
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_validators: DEFAULT_MIN_VALIDATORS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Rule that turns a score snapshot into one winner
pub trait SelectionPolicy: Send + Sync {
    /// Policy name, for logging
    fn name(&self) -> &'static str;

    /// Pick the top agent from `rows`, or `None` if nothing qualifies
    fn select(&self, rows: &[ScoredVersion]) -> Option<TopAgentRecord>;
}

/// Per-version aggregate over the latest validator scores
#[derive(Debug, Clone, PartialEq)]
pub struct VersionAggregate {
    pub version_id: VersionId,
    pub miner_hotkey: MinerHotkey,
    pub created_at: DateTime<Utc>,
    pub validators: usize,
    pub avg_score: f64,
}

/// Collapse raw rows into one aggregate per version, counting only each
/// validator's most recent score.
pub fn aggregate_latest(rows: &[ScoredVersion]) -> Vec<VersionAggregate> {
    let mut latest: HashMap<(VersionId, &ValidatorHotkey), &ScoredVersion> = HashMap::new();
    for row in rows {
        latest
            .entry((row.version_id, &row.validator_hotkey))
            .and_modify(|current| {
                if row.scored_at >= current.scored_at {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    let mut per_version: HashMap<VersionId, (VersionAggregate, f64)> = HashMap::new();
    for row in latest.into_values() {
        let (aggregate, sum) = per_version.entry(row.version_id).or_insert_with(|| {
            (
                VersionAggregate {
                    version_id: row.version_id,
                    miner_hotkey: row.miner_hotkey.clone(),
                    created_at: row.created_at,
                    validators: 0,
                    avg_score: 0.0,
                },
                0.0,
            )
        });
        aggregate.validators += 1;
        *sum += row.score;
    }

    let mut aggregates: Vec<VersionAggregate> = per_version
        .into_values()
        .map(|(mut aggregate, sum)| {
            aggregate.avg_score = sum / aggregate.validators as f64;
            aggregate
        })
        .collect();
    aggregates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version_id.cmp(&b.version_id)));
    aggregates
}

/// Oldest version within a relative band of the best score
#[derive(Debug, Clone, Default)]
pub struct ThresholdOldestPolicy {
    config: ConsensusConfig,
}

impl ThresholdOldestPolicy {
    /// `min_validators` below two is raised to two.
    pub fn new(mut config: ConsensusConfig) -> Self {
        config.min_validators = config.min_validators.max(DEFAULT_MIN_VALIDATORS);
        Self { config }
    }
}

impl SelectionPolicy for ThresholdOldestPolicy {
    fn name(&self) -> &'static str {
        "threshold-oldest"
    }

    fn select(&self, rows: &[ScoredVersion]) -> Option<TopAgentRecord> {
        let qualified: Vec<VersionAggregate> = aggregate_latest(rows)
            .into_iter()
            .filter(|a| a.validators >= self.config.min_validators)
            .collect();

        let best = qualified
            .iter()
            .map(|a| a.avg_score)
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = best * (1.0 - self.config.tolerance);

        qualified
            .into_iter()
            .filter(|a| a.avg_score >= floor)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version_id.cmp(&b.version_id)))
            .map(|winner| TopAgentRecord {
                miner_hotkey: winner.miner_hotkey,
                version_id: winner.version_id,
                avg_score: winner.avg_score,
            })
    }
}

/// Computes the top agent from the current score snapshot
pub struct ConsensusEngine {
    store: Arc<dyn CoordinationStore>,
    policy: Box<dyn SelectionPolicy>,
}

impl ConsensusEngine {
    /// Engine with the default threshold/oldest policy
    pub fn new(store: Arc<dyn CoordinationStore>, config: ConsensusConfig) -> Self {
        Self::with_policy(store, Box::new(ThresholdOldestPolicy::new(config)))
    }

    /// Engine with a custom selection policy
    pub fn with_policy(store: Arc<dyn CoordinationStore>, policy: Box<dyn SelectionPolicy>) -> Self {
        Self { store, policy }
    }

    /// Current top agent, or `None` when no version qualifies
    pub async fn top_agent(&self) -> CoordinationResult<Option<TopAgentRecord>> {
        let rows = self.store.get_top_agent_scores().await.map_err(|e| {
            error!(error = %e, "Failed to load validator scores");
            e
        })?;

        let top = self.policy.select(&rows);
        debug!(
            policy = self.policy.name(),
            rows = rows.len(),
            top_version = ?top.as_ref().map(|t| t.version_id),
            "Consensus computed"
        );
        Ok(top)
    }
}
