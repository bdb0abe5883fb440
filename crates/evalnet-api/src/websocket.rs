//! Validator WebSocket
//!
//! Validators connect to `/ws?validator_hotkey=<hotkey>`. Each connection is
//! registered with the coordinator's [`ConnectionRegistry`]; replies to
//! requests and server-pushed events share one ordered outbound queue.
//!
//! A newer connection for the same hotkey closes this one. When the socket
//! ends, only this connection's registry entry is released.
//!
//! [`ConnectionRegistry`]: evalnet_coordinator::ConnectionRegistry

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use evalnet_coordinator::CoordinationError;
use evalnet_types::{ServerEvent, ValidatorHotkey, ValidatorRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// Upgrade query parameters
#[derive(Debug, Deserialize)]
pub struct ValidatorQuery {
    pub validator_hotkey: Option<String>,
}

/// Upgrade handler for validator connections
pub async fn validator_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidatorQuery>,
) -> Response {
    let hotkey = match query.validator_hotkey.map(ValidatorHotkey::new) {
        Some(hotkey) if !hotkey.is_blank() => hotkey,
        _ => return ApiError::MissingParameter("validator_hotkey".to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| handle_validator_socket(socket, state, hotkey))
}

async fn handle_validator_socket(socket: WebSocket, state: Arc<AppState>, hotkey: ValidatorHotkey) {
    let registry = state.coordinator.registry().clone();
    let (channel, mut outbound) = registry.open_channel();
    let replies = outbound.reply_sender();
    let connection_id = registry.register(hotkey.clone(), channel);

    let (mut sender, mut receiver) = socket.split();

    // Drain the outbound queue until the registry closes this connection
    let writer_hotkey = hotkey.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(validator = %writer_hotkey, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = receiver.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        let reply = handle_request(&state, &hotkey, &text).await;
                        if replies.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    registry.release(&hotkey, connection_id);
    info!(validator = %hotkey, connection = connection_id, "Validator disconnected");
}

async fn handle_request(state: &AppState, hotkey: &ValidatorHotkey, text: &str) -> ServerEvent {
    let request = match serde_json::from_str::<ValidatorRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            warn!(validator = %hotkey, error = %e, "Invalid validator message");
            return ServerEvent::error("Invalid message");
        }
    };

    let dispatcher = state.coordinator.dispatcher();
    match request {
        ValidatorRequest::GetNextEvaluation => match dispatcher.next_evaluation(hotkey).await {
            Ok(assignment) => {
                debug!(validator = %hotkey, assigned = assignment.is_some(), "Answered evaluation request");
                ServerEvent::from(assignment)
            }
            Err(_) => ServerEvent::error("Failed to get next evaluation"),
        },
        ValidatorRequest::FinishEvaluation {
            evaluation_id,
            score,
        } => match dispatcher.complete_evaluation(hotkey, &evaluation_id, score).await {
            Ok(_) => ServerEvent::EvaluationRecorded { evaluation_id },
            Err(CoordinationError::UpstreamFailure(detail)) => {
                error!(validator = %hotkey, evaluation_id = %evaluation_id, error = %detail, "Failed to record evaluation");
                ServerEvent::error("Failed to record evaluation")
            }
            Err(e) => ServerEvent::error(e.to_string()),
        },
    }
}
