//! Scoring Handlers
//!
//! Administrative operations on agent versions and the weight broadcast.
//! Privileged endpoints take their credential as a query parameter.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use evalnet_coordinator::{BroadcastRecord, TickOutcome};
use evalnet_types::{AgentVersion, MinerHotkey, TopAgentRecord, VersionId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Query for `POST /scoring/ban-agent`
#[derive(Debug, Deserialize)]
pub struct BanAgentQuery {
    /// Miner hotkey owning the agent
    pub agent_id: Option<String>,
    pub ban_password: Option<String>,
}

/// Query for `POST /scoring/approve-version`
#[derive(Debug, Deserialize)]
pub struct ApproveVersionQuery {
    pub version_id: Option<String>,
    pub approval_password: Option<String>,
}

/// Query for `POST /scoring/re-eval-approved`
#[derive(Debug, Deserialize)]
pub struct ReEvalQuery {
    pub approval_password: Option<String>,
}

/// Plain acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Result of a ban
#[derive(Debug, Serialize)]
pub struct BanAgentResponse {
    pub message: String,
    /// Versions that moved to `banned`
    pub banned_versions: Vec<VersionId>,
}

/// Result of an on-demand weight broadcast
#[derive(Debug, Serialize)]
pub struct TriggerWeightResponse {
    pub message: String,
    /// `broadcast`, `no_consensus` or `skipped`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastRecord>,
}

/// Result of a re-evaluation request
#[derive(Debug, Serialize)]
pub struct ReEvalResponse {
    pub message: String,
    pub agents: Vec<AgentVersion>,
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::MissingParameter(name.to_string())),
    }
}

/// A supplied password may be blank; only an absent one is missing. The
/// credential check decides whether a blank value is accepted.
fn supplied_password(value: Option<String>, name: &str) -> ApiResult<String> {
    value.ok_or_else(|| ApiError::MissingParameter(name.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// Current consensus winner, computed fresh; `null` when nothing qualifies
pub async fn check_top_agent(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Option<TopAgentRecord>>> {
    let top = state.coordinator.consensus().top_agent().await?;
    Ok(Json(top))
}

/// Ban every version of an agent
pub async fn ban_agent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BanAgentQuery>,
) -> ApiResult<Json<BanAgentResponse>> {
    let password = supplied_password(query.ban_password, "ban_password")?;
    state.admin.verify_ban(&password)?;
    let agent_id = required(query.agent_id, "agent_id")?;

    let miner = MinerHotkey::new(agent_id);
    let banned_versions = state.coordinator.state_machine().ban_agent(&miner).await?;

    info!(miner = %miner, versions = banned_versions.len(), "Ban requested via API");
    Ok(Json(BanAgentResponse {
        message: "Agent banned successfully".to_string(),
        banned_versions,
    }))
}

/// Approve an evaluated version for weight consideration
pub async fn approve_version(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApproveVersionQuery>,
) -> ApiResult<Json<MessageResponse>> {
    let password = supplied_password(query.approval_password, "approval_password")?;
    state.admin.verify_approval(&password)?;
    let raw = required(query.version_id, "version_id")?;

    let version_id = VersionId::parse(&raw)
        .map_err(|_| ApiError::BadRequest(format!("invalid version_id: {}", raw)))?;
    state.coordinator.state_machine().approve_version(&version_id).await?;

    Ok(Json(MessageResponse {
        message: format!("Successfully approved {}", version_id),
    }))
}

/// Run one weight broadcast tick now
pub async fn trigger_weight_update(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TriggerWeightResponse>> {
    let outcome = state.coordinator.broadcaster().tick().await?;

    let (outcome, broadcast) = match outcome {
        TickOutcome::Broadcast(record) => ("broadcast", Some(record)),
        TickOutcome::NoConsensus => ("no_consensus", None),
        TickOutcome::Skipped => ("skipped", None),
    };

    Ok(Json(TriggerWeightResponse {
        message: "Successfully triggered weight update".to_string(),
        outcome,
        broadcast,
    }))
}

/// Send every approved version back through screening
pub async fn re_eval_approved(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReEvalQuery>,
) -> ApiResult<Json<ReEvalResponse>> {
    let password = supplied_password(query.approval_password, "approval_password")?;
    state.admin.verify_approval(&password)?;

    let agents = state.coordinator.state_machine().re_evaluate_approved_agents().await?;

    let message = if agents.is_empty() {
        "No approved agents found for re-evaluation".to_string()
    } else {
        format!(
            "Successfully initiated re-evaluation for {} approved agents",
            agents.len()
        )
    };

    Ok(Json(ReEvalResponse { message, agents }))
}
