//! Errors returned by [`AuthService`](crate::AuthService) operations
//!
//! Messages are safe to pass to clients: they never say whether a username
//! exists, nor whether a token failed on signature, expiry or revocation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Auth service errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid request: {}", format_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Missing token")]
    MissingToken,

    #[error("Invalid or expired session")]
    InvalidOrExpiredSession,

    #[error("User not found")]
    UserNotFound,

    #[error("Password change rejected: {0}")]
    PasswordChangeRejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AuthError {
    /// Stable machine-readable code for response envelopes
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::InvalidOrExpiredSession => "INVALID_OR_EXPIRED_SESSION",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::PasswordChangeRejected(_) => "PASSWORD_CHANGE_REJECTED",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut violations: Vec<FieldViolation> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |e| FieldViolation {
                    field: field.clone(),
                    code: e.code.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        violations.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));

        AuthError::Validation(violations)
    }
}
