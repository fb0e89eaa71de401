//! till-auth - session and token core for the till back office
//!
//! This crate provides token-based authentication with the following components:
//! - Signed access/refresh tokens with an injectable clock
//! - A revocation list and a registry of live sessions
//! - [`AuthService`] orchestrating login, logout, verification, password
//!   changes, refresh and periodic cleanup
//! - Contracts for the credential store and the security-event sink, with
//!   in-memory and tracing-backed implementations
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use till_auth::{
//!     AuthService, HashingConfig, LoginRequest, MemoryCredentialStore, StrengthPolicy,
//!     TracingEventSink,
//! };
//! use till_core::{AppConfig, User, UserRole};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AppConfig::from_env()?;
//! let store = MemoryCredentialStore::new(&HashingConfig::default(), StrengthPolicy::default())?;
//! store
//!     .add_user(User::new("u-1", "alice", UserRole::Manager), "Correct-pw1")
//!     .await?;
//!
//! let service = AuthService::new(config.auth, Arc::new(store), Arc::new(TracingEventSink))?;
//! let login = service.login(LoginRequest::new("alice", "Correct-pw1")).await?;
//! let status = service.verify_session(&login.access_token).await?;
//! assert!(status.is_valid);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cleanup;
pub mod clock;
pub mod error;
pub mod models;
pub mod password;
pub mod revocation;
pub mod service;
pub mod session;
pub mod store;
pub mod token;

pub use audit::{SecurityEvent, SecurityEventSink, Severity, TracingEventSink};
pub use cleanup::{spawn_cleanup, CleanupTask};
pub use clock::{Clock, SystemClock};
pub use error::{AuthError, FieldViolation};
pub use models::{
    ChangePasswordRequest, CleanupReport, LoginRequest, LoginResponse, RefreshResponse,
    SessionStats, SessionStatus,
};
pub use password::{Argon2Hasher, HashingConfig, PasswordError, StrengthPolicy};
pub use revocation::{RevocationList, UserCutoffs};
pub use service::AuthService;
pub use session::{Session, SessionRegistry};
pub use store::{CredentialError, CredentialStore, MemoryCredentialStore};
pub use token::{
    decode_unsafe, TokenClaims, TokenCodec, TokenError, TokenKind, TokenSubject,
    VerificationError,
};

#[cfg(any(test, feature = "test-utils"))]
pub use audit::{RecordedEvent, RecordingEventSink};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
