//! till Core - Domain models and shared configuration
//!
//! This crate defines the types shared by the authentication core and the
//! binaries that host it:
//! - User accounts and roles as seen by the auth layer
//! - Configuration management (auth secrets, TTLs, logging)

pub mod config;

pub use config::{
    AppConfig, AuthConfig, ConfigError, LoggingConfig, PasswordChangePolicy, MAX_TTL_SECS,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Users and Roles
// ============================================================================

/// Role attached to every user and carried inside issued tokens
///
/// - `Admin`: full back-office access including user management
/// - `Manager`: reports, settings and staff oversight
/// - `Staff`: day-to-day operation (tables, orders)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Staff,
}

impl UserRole {
    /// Convert role to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Staff => "staff",
        }
    }

    /// Check if this role may manage other users
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "staff" => Ok(UserRole::Staff),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// User record as returned by a credential store
///
/// Never carries password material; stores keep hashes to themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier (the token subject)
    pub id: String,
    /// Login name
    pub username: String,
    /// Name shown in the UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Access level
    pub role: UserRole,
    /// Whether the account may log in
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl User {
    /// Create an active user without a display name
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            role,
            is_active: true,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
