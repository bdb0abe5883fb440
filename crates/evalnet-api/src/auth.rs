//! Administrative credentials

use std::fmt;

use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};

/// Shared secrets guarding the administrative scoring endpoints
#[derive(Clone)]
pub struct AdminCredentials {
    ban_password: String,
    approval_password: String,
}

impl AdminCredentials {
    pub fn new(ban_password: impl Into<String>, approval_password: impl Into<String>) -> Self {
        Self {
            ban_password: ban_password.into(),
            approval_password: approval_password.into(),
        }
    }

    /// Check the password for banning agents
    pub fn verify_ban(&self, supplied: &str) -> ApiResult<()> {
        if constant_time_eq(&self.ban_password, supplied) {
            Ok(())
        } else {
            Err(ApiError::InvalidBanPassword)
        }
    }

    /// Check the password for approving and re-evaluating versions
    pub fn verify_approval(&self, supplied: &str) -> ApiResult<()> {
        if constant_time_eq(&self.approval_password, supplied) {
            Ok(())
        } else {
            Err(ApiError::InvalidApprovalPassword)
        }
    }
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("ban_password", &"<redacted>")
            .field("approval_password", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}
