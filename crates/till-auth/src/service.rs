//! Authentication service layer
//!
//! Orchestrates login, logout, session verification, password changes,
//! token refresh and periodic cleanup on top of the token codec, the
//! revocation list and the session registry.
//!
//! Token lifecycle: issued at login, active while it verifies and is not
//! revoked, then revoked (logout, password-change policy) or expired, and
//! finally reaped by [`AuthService::cleanup_expired_sessions`].

use crate::audit::{SecurityEvent, SecurityEventSink};
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::models::{
    ChangePasswordRequest, CleanupReport, LoginRequest, LoginResponse, RefreshResponse,
    SessionStats, SessionStatus,
};
use crate::revocation::{RevocationList, UserCutoffs};
use crate::session::{Session, SessionRegistry};
use crate::store::{CredentialError, CredentialStore};
use crate::token::{decode_unsafe, TokenClaims, TokenCodec, TokenKind, TokenSubject};
use chrono::Duration;
use std::sync::Arc;
use till_core::{AuthConfig, ConfigError, PasswordChangePolicy, User};
use tracing::{debug, info, warn};
use validator::Validate;

const TOKEN_TYPE: &str = "Bearer";

/// Authentication service
///
/// Owns the revocation list and session registry for its whole lifetime.
/// Share it between request handlers with `Arc`.
pub struct AuthService {
    config: AuthConfig,
    codec: TokenCodec,
    revocations: RevocationList,
    cutoffs: UserCutoffs,
    sessions: SessionRegistry,
    store: Arc<dyn CredentialStore>,
    events: Arc<dyn SecurityEventSink>,
}

impl AuthService {
    /// Create a new authentication service on the system clock
    ///
    /// Fails if the secrets or lifetimes in `config` are unusable.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn SecurityEventSink>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        events: Arc<dyn SecurityEventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let codec = TokenCodec::new(&config, clock)?;

        Ok(Self {
            config,
            codec,
            revocations: RevocationList::new(),
            cutoffs: UserCutoffs::new(),
            sessions: SessionRegistry::new(),
            store,
            events,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn access_ttl(&self) -> Duration {
        Duration::seconds(self.config.access_ttl_secs as i64)
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.config.refresh_ttl_secs as i64)
    }

    /// Login with username and password
    ///
    /// # Returns
    ///
    /// * `Ok(LoginResponse)` - User, access token, refresh token and session id
    /// * `Err(AuthError::Validation)` - Empty or oversized fields
    /// * `Err(AuthError::InvalidCredentials)` - Unknown user or wrong password
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, AuthError> {
        request.validate()?;

        let user = match self
            .store
            .find_by_credentials(&request.username, &request.password)
            .await
        {
            Ok(user) if user.is_active => user,
            Ok(_) => return Err(self.login_failed(&request.username, "account_inactive")),
            Err(CredentialError::Unavailable(e)) => {
                warn!(error = %e, "Credential store unavailable during login");
                self.events.record_event(&SecurityEvent::AuthenticationFailure {
                    username: request.username,
                    reason: "store_unavailable".to_string(),
                });
                return Err(AuthError::Internal("credential store unavailable".to_string()));
            }
            Err(_) => return Err(self.login_failed(&request.username, "invalid_credentials")),
        };

        let subject = TokenSubject::from(&user);
        let access_token = self.mint(&subject, TokenKind::Access)?;
        let refresh_token = self.mint(&subject, TokenKind::Refresh)?;

        let session_id = self.sessions.create(&user.id, &access_token, &refresh_token);

        info!(user_id = %user.id, session_id = %session_id, "User logged in");
        self.events.record_event(&SecurityEvent::AuthenticationSuccess {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role.to_string(),
            session_id: session_id.clone(),
        });

        Ok(LoginResponse {
            user,
            access_token,
            refresh_token,
            session_id,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.config.access_ttl_secs,
        })
    }

    fn login_failed(&self, username: &str, reason: &str) -> AuthError {
        debug!(username, reason, "Login rejected");
        self.events.record_event(&SecurityEvent::AuthenticationFailure {
            username: username.to_string(),
            reason: reason.to_string(),
        });
        AuthError::InvalidCredentials
    }

    /// Logout by revoking both tokens and dropping the session
    ///
    /// Always succeeds; logging out tokens that are already expired, revoked
    /// or unknown is a no-op apart from the audit event.
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        // Audit hint only; these claims are unverified
        let claimed_user = decode_unsafe(access_token)
            .or_else(|| decode_unsafe(refresh_token))
            .map(|claims| claims.sub);

        // Revoke before removing so a finished logout never leaves a live token
        for token in [access_token, refresh_token] {
            if !token.is_empty() {
                self.revocations.add(token);
            }
        }

        let session_removed = (!access_token.is_empty()
            && self.sessions.remove_by_access_token(access_token))
            || (!refresh_token.is_empty() && self.sessions.remove_by_refresh_token(refresh_token));

        info!(user_id = ?claimed_user, session_removed, "User logged out");
        self.events.record_event(&SecurityEvent::Logout {
            user_id: claimed_user,
            session_removed,
        });

        Ok(())
    }

    /// Verify an access token and load its user
    ///
    /// A token that verifies but has no live session (for example after a
    /// restart) is still accepted, with `is_valid` set to `false`.
    pub async fn verify_session(&self, access_token: &str) -> Result<SessionStatus, AuthError> {
        let claims = self.authenticate(access_token, TokenKind::Access)?;
        let user = self.load_user(&claims.sub).await?;

        let is_valid = self
            .sessions
            .find_by_access_token(access_token)
            .is_some_and(|session| session.user_id == user.id);
        if !is_valid {
            debug!(user_id = %user.id, "Verified token has no live session");
        }

        Ok(SessionStatus {
            user,
            claims,
            is_valid,
        })
    }

    /// Resolve the user behind an access token
    pub async fn get_current_user(&self, access_token: &str) -> Result<User, AuthError> {
        self.verify_session(access_token)
            .await
            .map(|status| status.user)
    }

    /// Change the password of the user behind `access_token`
    ///
    /// After a successful change the configured [`PasswordChangePolicy`]
    /// decides which of the user's sessions are revoked.
    pub async fn change_password(
        &self,
        access_token: &str,
        request: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        request.validate()?;

        let status = self.verify_session(access_token).await?;
        let user_id = status.user.id;

        let result = self
            .store
            .change_password(&user_id, &request.current_password, &request.new_password)
            .await;

        let reason = match result {
            Ok(()) => {
                let sessions_revoked = self.apply_password_change_policy(&user_id, access_token);
                info!(user_id = %user_id, sessions_revoked, "Password changed");
                self.events.record_event(&SecurityEvent::PasswordChanged {
                    user_id,
                    sessions_revoked,
                });
                return Ok(());
            }
            Err(CredentialError::Rejected(reason)) => reason,
            Err(CredentialError::InvalidCredentials) => "current password is incorrect".to_string(),
            Err(CredentialError::Unavailable(e)) => {
                warn!(user_id = %user_id, error = %e, "Credential store unavailable during password change");
                self.events.record_event(&SecurityEvent::PasswordChangeFailed {
                    user_id,
                    reason: "store_unavailable".to_string(),
                });
                return Err(AuthError::Internal("credential store unavailable".to_string()));
            }
        };

        self.events.record_event(&SecurityEvent::PasswordChangeFailed {
            user_id,
            reason: reason.clone(),
        });
        Err(AuthError::PasswordChangeRejected(reason))
    }

    fn apply_password_change_policy(&self, user_id: &str, access_token: &str) -> usize {
        let keep = match self.config.password_change_policy {
            PasswordChangePolicy::KeepSessions => return 0,
            PasswordChangePolicy::RevokeOthers => Some(access_token),
            PasswordChangePolicy::RevokeAll => {
                // Also covers a caller whose session was lost on restart
                self.revocations.add(access_token);
                None
            }
        };

        // Reaped sessions still hold live refresh tokens; the cutoff catches them
        let exempt = match keep {
            Some(token) => {
                let mut exempt = vec![token.to_string()];
                if let Some(session) = self.sessions.find_by_access_token(token) {
                    exempt.push(session.refresh_token);
                }
                exempt
            }
            None => Vec::new(),
        };
        self.cutoffs
            .set(user_id, self.codec.now().timestamp(), exempt);

        let doomed: Vec<Session> = self
            .sessions
            .find_by_user(user_id)
            .into_iter()
            .filter(|session| keep != Some(session.access_token.as_str()))
            .collect();

        for session in &doomed {
            self.revocations.add(&session.access_token);
            self.revocations.add(&session.refresh_token);
            self.sessions.remove_by_id(&session.session_id);
        }

        doomed.len()
    }

    /// Mint a new access token from a refresh token
    ///
    /// The refresh token is not rotated: it stays usable until it expires or
    /// is revoked by logout.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshResponse, AuthError> {
        let claims = self.authenticate(refresh_token, TokenKind::Refresh)?;

        let access_token = self.mint(&claims.subject(), TokenKind::Access)?;

        if self
            .sessions
            .replace_access_token(refresh_token, &access_token)
            .is_none()
        {
            debug!(user_id = %claims.sub, "Refreshed token has no live session");
        }

        self.events.record_event(&SecurityEvent::TokenRefreshed {
            user_id: claims.sub,
        });

        Ok(RefreshResponse {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.config.access_ttl_secs,
        })
    }

    /// Drop sessions whose access token no longer verifies, then drop
    /// revocation entries for tokens that have expired on their own
    ///
    /// No lock is held while tokens are checked. A session is only removed
    /// if it still holds the token that failed the check.
    pub fn cleanup_expired_sessions(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut doomed: Vec<(String, String, &'static str)> = Vec::new();

        self.sessions.for_each(|session| {
            report.sessions_scanned += 1;
            if let Err(reason) = self.check_stored_session(session) {
                doomed.push((
                    session.session_id.clone(),
                    session.access_token.clone(),
                    reason,
                ));
            }
        });

        for (session_id, access_token, reason) in doomed {
            if self
                .sessions
                .remove_if_access_token(&session_id, &access_token)
            {
                debug!(session_id = %session_id, reason, "Reaped session");
                report.sessions_removed += 1;
            }
        }

        report.revocations_removed = self.revocations.sweep(|token| self.codec.is_dead(token));

        // Every token issued before an older cutoff has expired on its own
        let longest_ttl = self.config.access_ttl_secs.max(self.config.refresh_ttl_secs) as i64;
        let cutoffs_removed = self
            .cutoffs
            .prune(self.codec.now().timestamp() - longest_ttl);
        if cutoffs_removed > 0 {
            debug!(cutoffs_removed, "Dropped expired password-change cutoffs");
        }

        if report.sessions_removed > 0 || report.revocations_removed > 0 {
            info!(
                sessions_scanned = report.sessions_scanned,
                sessions_removed = report.sessions_removed,
                revocations_removed = report.revocations_removed,
                "Cleanup pass complete"
            );
        } else {
            debug!(sessions_scanned = report.sessions_scanned, "Cleanup pass found nothing to remove");
        }

        report
    }

    fn check_stored_session(&self, session: &Session) -> Result<(), &'static str> {
        let claims = self
            .codec
            .verify(&session.access_token, TokenKind::Access)
            .map_err(|e| e.reason())?;

        if self.revocations.contains(&session.access_token) {
            return Err("revoked");
        }
        if self
            .cutoffs
            .is_cut_off(&claims.sub, claims.iat, &session.access_token)
        {
            return Err("superseded");
        }
        if claims.sub != session.user_id {
            warn!(
                session_id = %session.session_id,
                "Session token subject does not match its user"
            );
            return Err("subject_mismatch");
        }

        Ok(())
    }

    /// Current session and revocation counts
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_session_count: self.sessions.len(),
            revoked_token_count: self.revocations.len(),
            timestamp: self.codec.now(),
        }
    }

    /// Snapshot of every registered session
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions = Vec::with_capacity(self.sessions.len());
        self.sessions.for_each(|session| sessions.push(session.clone()));
        sessions
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revocations.contains(token)
    }

    /// Verify a token of `kind` and check it has not been revoked
    fn authenticate(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = match self.codec.verify(token, kind) {
            Ok(claims) => claims,
            Err(e) => {
                self.events.record_event(&SecurityEvent::InvalidToken {
                    kind: kind.to_string(),
                    reason: e.reason().to_string(),
                });
                return Err(AuthError::InvalidOrExpiredSession);
            }
        };

        let rejection = if self.revocations.contains(token) {
            Some("revoked")
        } else if self.cutoffs.is_cut_off(&claims.sub, claims.iat, token) {
            Some("superseded")
        } else {
            None
        };
        if let Some(reason) = rejection {
            self.events.record_event(&SecurityEvent::InvalidToken {
                kind: kind.to_string(),
                reason: reason.to_string(),
            });
            return Err(AuthError::InvalidOrExpiredSession);
        }

        Ok(claims)
    }

    async fn load_user(&self, user_id: &str) -> Result<User, AuthError> {
        match self.store.find_by_id(user_id).await {
            Ok(Some(user)) if user.is_active => Ok(user),
            Ok(Some(_)) => {
                debug!(user_id, "Token belongs to an inactive account");
                Err(AuthError::InvalidOrExpiredSession)
            }
            Ok(None) => Err(AuthError::UserNotFound),
            Err(e) => {
                warn!(user_id, error = %e, "Credential store lookup failed");
                Err(AuthError::Internal("credential store unavailable".to_string()))
            }
        }
    }

    fn mint(&self, subject: &TokenSubject, kind: TokenKind) -> Result<String, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl(),
            TokenKind::Refresh => self.refresh_ttl(),
        };

        self.codec
            .mint(subject, kind, ttl)
            .map_err(|e| AuthError::Internal(format!("Failed to generate {kind} token: {e}")))
    }
}
