//! Scoring API Tests
//!
//! Drives the router in-process against an in-memory store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use evalnet_api::{create_test_router, AdminCredentials, AppState};
use evalnet_coordinator::{Coordinator, CoordinatorConfig};
use evalnet_store::MemoryStore;
use evalnet_types::{
    AgentStatus, AgentVersion, MinerHotkey, ServerEvent, ValidatorHotkey, ValidatorScore,
};

const BAN_PASSWORD: &str = "ban-secret";
const APPROVAL_PASSWORD: &str = "approval-secret";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    coordinator: Arc<Coordinator>,
}

fn test_app() -> TestApp {
    test_app_with(AdminCredentials::new(BAN_PASSWORD, APPROVAL_PASSWORD))
}

fn test_app_with(admin: AdminCredentials) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(Coordinator::new(store.clone(), CoordinatorConfig::default()));
    let state = Arc::new(AppState::new(coordinator.clone(), admin));
    TestApp {
        router: create_test_router(state),
        store,
        coordinator,
    }
}

async fn json_request(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!(null));

    (status, json)
}

fn version(miner: &str, status: AgentStatus) -> AgentVersion {
    AgentVersion::new(MinerHotkey::new(miner), "agent", 1).with_status(status)
}

fn score(store: &MemoryStore, version: &AgentVersion, validator: &str, value: f64) {
    store.record_score(ValidatorScore {
        version_id: version.version_id,
        validator_hotkey: ValidatorHotkey::new(validator),
        score: value,
        scored_at: Utc::now(),
    });
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = json_request(&app.router, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connected_validators"], 0);
    assert_eq!(body["broadcast_loop_running"], false);
    assert!(body["last_broadcast"].is_null());
}

// =============================================================================
// Ban
// =============================================================================

#[tokio::test]
async fn test_ban_rejects_bad_password() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Approved);
    app.store.insert_version(v.clone());

    let (status, body) = json_request(
        &app.router,
        "POST",
        "/scoring/ban-agent?agent_id=5Miner&ban_password=wrong",
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Invalid ban password");
    assert_eq!(app.store.version(&v.version_id).unwrap().status, AgentStatus::Approved);
}

#[tokio::test]
async fn test_ban_agent() {
    let app = test_app();
    let a = version("5Miner", AgentStatus::Approved);
    let b = version("5Miner", AgentStatus::Evaluating);
    let other = version("5Other", AgentStatus::Approved);
    for v in [&a, &b, &other] {
        app.store.insert_version(v.clone());
    }

    let uri = format!("/scoring/ban-agent?agent_id=5Miner&ban_password={}", BAN_PASSWORD);
    let (status, body) = json_request(&app.router, "POST", &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Agent banned successfully");
    assert_eq!(body["banned_versions"].as_array().unwrap().len(), 2);
    assert_eq!(app.store.version(&a.version_id).unwrap().status, AgentStatus::Banned);
    assert_eq!(app.store.version(&b.version_id).unwrap().status, AgentStatus::Banned);
    assert_eq!(app.store.version(&other.version_id).unwrap().status, AgentStatus::Approved);
}

#[tokio::test]
async fn test_ban_unknown_agent() {
    let app = test_app();
    let uri = format!("/scoring/ban-agent?agent_id=5Ghost&ban_password={}", BAN_PASSWORD);
    let (status, _) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_password_is_a_credential_failure() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Approved);
    app.store.insert_version(v.clone());

    let (status, body) = json_request(
        &app.router,
        "POST",
        "/scoring/ban-agent?agent_id=5Miner&ban_password=",
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Invalid ban password");
    assert_eq!(app.store.version(&v.version_id).unwrap().status, AgentStatus::Approved);
}

#[tokio::test]
async fn test_blank_passwords_accepted_when_unconfigured() {
    let app = test_app_with(AdminCredentials::new("", ""));
    let v = version("5Miner", AgentStatus::Evaluating);
    app.store.insert_version(v.clone());

    let uri = format!("/scoring/approve-version?version_id={}&approval_password=", v.version_id);
    let (status, _) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = json_request(
        &app.router,
        "POST",
        "/scoring/ban-agent?agent_id=5Miner&ban_password=",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["banned_versions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ban_missing_agent_id() {
    let app = test_app();
    let uri = format!("/scoring/ban-agent?ban_password={}", BAN_PASSWORD);
    let (status, body) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], -1102);
}

// =============================================================================
// Approve
// =============================================================================

#[tokio::test]
async fn test_approve_version() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Evaluating);
    app.store.insert_version(v.clone());

    let uri = format!(
        "/scoring/approve-version?version_id={}&approval_password={}",
        v.version_id, APPROVAL_PASSWORD
    );
    let (status, body) = json_request(&app.router, "POST", &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("Successfully approved {}", v.version_id));
    assert_eq!(app.store.version(&v.version_id).unwrap().status, AgentStatus::Approved);
}

#[tokio::test]
async fn test_approve_rejects_bad_password() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Evaluating);
    app.store.insert_version(v.clone());

    let uri = format!(
        "/scoring/approve-version?version_id={}&approval_password=nope",
        v.version_id
    );
    let (status, body) = json_request(&app.router, "POST", &uri).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Invalid approval password");
}

#[tokio::test]
async fn test_approve_banned_version_conflicts() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Banned);
    app.store.insert_version(v.clone());

    let uri = format!(
        "/scoring/approve-version?version_id={}&approval_password={}",
        v.version_id, APPROVAL_PASSWORD
    );
    let (status, body) = json_request(&app.router, "POST", &uri).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["msg"].as_str().unwrap().contains("banned -> approved"));
    assert_eq!(app.store.version(&v.version_id).unwrap().status, AgentStatus::Banned);
}

#[tokio::test]
async fn test_approve_unknown_and_malformed_version() {
    let app = test_app();

    let uri = format!(
        "/scoring/approve-version?version_id={}&approval_password={}",
        evalnet_types::VersionId::new(),
        APPROVAL_PASSWORD
    );
    let (status, _) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!(
        "/scoring/approve-version?version_id=not-a-uuid&approval_password={}",
        APPROVAL_PASSWORD
    );
    let (status, _) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Re-evaluation
// =============================================================================

#[tokio::test]
async fn test_re_eval_approved() {
    let app = test_app();
    app.store.insert_version(version("m1", AgentStatus::Approved));
    app.store.insert_version(version("m2", AgentStatus::Approved));
    app.store.insert_version(version("m3", AgentStatus::Screening));

    let uri = format!("/scoring/re-eval-approved?approval_password={}", APPROVAL_PASSWORD);

    let (status, body) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Successfully initiated re-evaluation for 2 approved agents"
    );
    let agents = body["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert!(agents.iter().all(|a| a["status"] == "awaiting_screening"));

    let (status, body) = json_request(&app.router, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No approved agents found for re-evaluation");
    assert_eq!(body["agents"], json!([]));
}

#[tokio::test]
async fn test_re_eval_requires_password() {
    let app = test_app();
    let (status, _) = json_request(&app.router, "POST", "/scoring/re-eval-approved").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &app.router,
        "POST",
        "/scoring/re-eval-approved?approval_password=wrong",
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Weights
// =============================================================================

#[tokio::test]
async fn test_check_top_agent() {
    let app = test_app();

    let (status, body) = json_request(&app.router, "GET", "/scoring/check-top-agent").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    let older = version("5Old", AgentStatus::Approved).with_created_at(Utc::now() - Duration::days(3));
    let newer = version("5New", AgentStatus::Approved);
    app.store.insert_version(older.clone());
    app.store.insert_version(newer.clone());
    score(&app.store, &older, "a", 0.95);
    score(&app.store, &older, "b", 0.95);
    score(&app.store, &newer, "a", 0.97);
    score(&app.store, &newer, "b", 0.96);

    let (status, body) = json_request(&app.router, "GET", "/scoring/check-top-agent").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version_id"], older.version_id.to_string());
    assert_eq!(body["miner_hotkey"], "5Old");
}

#[tokio::test]
async fn test_trigger_weight_update_without_consensus() {
    let app = test_app();
    let (status, body) = json_request(&app.router, "POST", "/scoring/trigger-weight-update").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Successfully triggered weight update");
    assert_eq!(body["outcome"], "no_consensus");
    assert!(body.get("broadcast").is_none());
}

#[tokio::test]
async fn test_trigger_weight_update_broadcasts() {
    let app = test_app();
    let v = version("5Miner", AgentStatus::Approved);
    app.store.insert_version(v.clone());
    score(&app.store, &v, "a", 0.9);
    score(&app.store, &v, "b", 0.8);

    let registry = app.coordinator.registry();
    let (channel, mut rx) = registry.open_channel();
    registry.register(ValidatorHotkey::new("v1"), channel);

    let (status, body) = json_request(&app.router, "POST", "/scoring/trigger-weight-update").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "broadcast");
    assert_eq!(body["broadcast"]["delivered"], 1);
    assert_eq!(body["broadcast"]["failed"], 0);

    match rx.recv().await {
        Some(ServerEvent::SetWeights(top)) => assert_eq!(top.version_id, v.version_id),
        other => panic!("unexpected event {:?}", other),
    }

    let (_, health) = json_request(&app.router, "GET", "/health").await;
    assert_eq!(health["connected_validators"], 1);
    assert_eq!(
        health["last_broadcast"]["top_agent"]["version_id"],
        v.version_id.to_string()
    );
}
