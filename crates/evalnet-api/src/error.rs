//! API error handling
//!
//! Every error renders as `{"code": <i32>, "msg": <string>}`. Upstream faults
//! are logged in full and answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use evalnet_coordinator::CoordinationError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (-1000 to -1099)
    // =========================================================================
    #[error("Invalid ban password")]
    InvalidBanPassword,

    #[error("Invalid approval password")]
    InvalidApprovalPassword,

    // =========================================================================
    // Request Errors (-1100 to -1199)
    // =========================================================================
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // =========================================================================
    // Lifecycle Errors (-2000 to -2099)
    // =========================================================================
    #[error("{0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Resource not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Internal Errors (-5000 to -5099)
    // =========================================================================
    #[error("Service temporarily unavailable, please try again later")]
    ServiceUnavailable,

    #[error("Internal server error")]
    InternalError,
}

impl ApiError {
    /// Numeric error code
    pub fn error_code(&self) -> i32 {
        match self {
            Self::InvalidBanPassword => -1001,
            Self::InvalidApprovalPassword => -1002,

            Self::MissingParameter(_) => -1102,
            Self::BadRequest(_) => -1100,

            Self::InvalidTransition(_) => -2001,
            Self::Conflict(_) => -2002,

            Self::NotFound(_) => -4000,

            Self::InternalError => -5000,
            Self::ServiceUnavailable => -5001,
        }
    }

    /// HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBanPassword | Self::InvalidApprovalPassword => StatusCode::UNAUTHORIZED,

            Self::MissingParameter(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,

            Self::InvalidTransition(_) | Self::Conflict(_) => StatusCode::CONFLICT,

            Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: i32,
    /// Human-readable error message
    pub msg: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.error_code(),
            msg: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::from(&self))).into_response()
    }
}

impl From<CoordinationError> for ApiError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::NotFound(what) => Self::NotFound(what),
            CoordinationError::InvalidTransition { .. } => Self::InvalidTransition(err.to_string()),
            CoordinationError::Conflict(what) => Self::Conflict(what),
            CoordinationError::InvalidInput(what) => Self::BadRequest(what),
            CoordinationError::NotConnected(hotkey) => {
                Self::NotFound(format!("validator {} is not connected", hotkey))
            }
            CoordinationError::ConsensusUnavailable => {
                Self::NotFound("no version qualifies for consensus".to_string())
            }
            CoordinationError::ChannelFull(_) => {
                error!(error = %err, "Validator queue full");
                Self::ServiceUnavailable
            }
            CoordinationError::UpstreamFailure(_) => {
                error!(error = %err, "Upstream failure");
                Self::InternalError
            }
        }
    }
}
