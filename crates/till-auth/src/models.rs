//! Request and response types for the auth service operations

use crate::token::TokenClaims;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use till_core::User;
use validator::Validate;

/// User login request
///
/// Passwords are capped at 128 characters to bound hashing work per request.
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "username must be 1-64 characters"))]
    pub username: String,
    #[validate(length(min = 1, max = 128, message = "password must be 1-128 characters"))]
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Password change request
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 128, message = "current password must be 1-128 characters"))]
    pub current_password: String,
    #[validate(length(min = 1, max = 128, message = "new password must be 1-128 characters"))]
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn new(current_password: impl Into<String>, new_password: impl Into<String>) -> Self {
        Self {
            current_password: current_password.into(),
            new_password: new_password.into(),
        }
    }
}

impl std::fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePasswordRequest").finish_non_exhaustive()
    }
}

/// Successful login: the user and a fresh token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// New access token minted from a refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Result of verifying an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub user: User,
    pub claims: TokenClaims,
    /// Whether a live session still maps this exact token to the user.
    /// `false` means authenticated but not registered (e.g. after a restart).
    pub is_valid: bool,
}

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub sessions_scanned: usize,
    pub sessions_removed: usize,
    pub revocations_removed: usize,
}

/// Read-only snapshot for health and status checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_session_count: usize,
    pub revoked_token_count: usize,
    pub timestamp: DateTime<Utc>,
}
