//! Security audit events for authentication
//!
//! The auth service reports logins, logouts, refreshes and password changes
//! to a [`SecurityEventSink`]. Recording is fire-and-forget: a sink error is
//! logged and never fails the operation that produced the event.
//!
//! [`TracingEventSink`] logs every event at INFO level with the "audit"
//! target, making them easy to filter and route to security monitoring.
//!
//! # Example
//!
//! ```ignore
//! use till_auth::audit::{SecurityEvent, SecurityEventSink, TracingEventSink};
//!
//! TracingEventSink.record_event(&SecurityEvent::Logout {
//!     user_id: Some("user-1".to_string()),
//!     session_removed: true,
//! });
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// How urgently a security team should look at an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security events emitted by the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// Credentials accepted and a session opened
    AuthenticationSuccess {
        user_id: String,
        username: String,
        role: String,
        session_id: String,
    },

    /// Credentials rejected
    AuthenticationFailure { username: String, reason: String },

    /// Token pair revoked. `user_id` comes from an unverified decode.
    Logout {
        user_id: Option<String>,
        session_removed: bool,
    },

    /// Access token minted from a refresh token
    TokenRefreshed { user_id: String },

    /// Token rejected during verification
    InvalidToken { kind: String, reason: String },

    /// Password updated by the store
    PasswordChanged {
        user_id: String,
        sessions_revoked: usize,
    },

    /// Password change refused by the store
    PasswordChangeFailed { user_id: String, reason: String },
}

impl SecurityEvent {
    /// Event name as recorded by sinks
    pub fn event_type(&self) -> &'static str {
        match self {
            SecurityEvent::AuthenticationSuccess { .. } => "authentication_success",
            SecurityEvent::AuthenticationFailure { .. } => "authentication_failure",
            SecurityEvent::Logout { .. } => "logout",
            SecurityEvent::TokenRefreshed { .. } => "token_refreshed",
            SecurityEvent::InvalidToken { .. } => "invalid_token",
            SecurityEvent::PasswordChanged { .. } => "password_changed",
            SecurityEvent::PasswordChangeFailed { .. } => "password_change_failed",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SecurityEvent::AuthenticationSuccess { .. }
            | SecurityEvent::Logout { .. }
            | SecurityEvent::TokenRefreshed { .. } => Severity::Low,
            SecurityEvent::AuthenticationFailure { .. }
            | SecurityEvent::InvalidToken { .. }
            | SecurityEvent::PasswordChanged { .. } => Severity::Medium,
            SecurityEvent::PasswordChangeFailed { .. } => Severity::High,
        }
    }

    /// Event fields without the `event_type` tag
    pub fn payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("event_type");
                map
            }
            _ => Map::new(),
        }
    }
}

/// Receiver of security events
pub trait SecurityEventSink: Send + Sync {
    /// Record one event
    ///
    /// Errors are reported back so the caller can log them; the auth service
    /// never lets them fail a request.
    fn record(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
        severity: Severity,
    ) -> anyhow::Result<()>;

    /// Record a typed event, logging and swallowing sink errors
    fn record_event(&self, event: &SecurityEvent) {
        if let Err(e) = self.record(event.event_type(), event.payload(), event.severity()) {
            warn!(
                event_type = event.event_type(),
                error = %e,
                "Failed to record security event"
            );
        }
    }
}

/// Sink that writes events to the "audit" tracing target as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn record(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
        severity: Severity,
    ) -> anyhow::Result<()> {
        let event_json = serde_json::to_string(&payload)?;

        // Separate target so security teams can route audit logs on their own
        info!(
            target: "audit",
            timestamp = %chrono::Utc::now(),
            event_type = %event_type,
            severity = %severity,
            event = %event_json,
            "Security event"
        );

        Ok(())
    }
}

/// One event captured by [`RecordingEventSink`]
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event_type: String,
    pub payload: Map<String, Value>,
    pub severity: Severity,
}

/// Sink that keeps events in memory for assertions
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<RecordedEvent>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SecurityEventSink for RecordingEventSink {
    fn record(
        &self,
        event_type: &str,
        payload: Map<String, Value>,
        severity: Severity,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedEvent {
                event_type: event_type.to_string(),
                payload,
                severity,
            });
        Ok(())
    }
}
