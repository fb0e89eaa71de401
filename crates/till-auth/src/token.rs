//! Signed token minting and verification
//!
//! Tokens are compact JWS strings signed with HMAC-SHA256. Access and refresh
//! tokens carry a `kind` claim and are signed with separate secrets, so a
//! leaked access secret cannot be used to forge refresh tokens.
//!
//! Expiry is checked against the injected [`Clock`] rather than the
//! library's own wall-clock check, with no leeway.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use till_core::{AuthConfig, ConfigError, User, UserRole};
use uuid::Uuid;

/// Which secret and lifetime a token was minted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims embedded in every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Unique token identifier; keeps tokens minted in the same second distinct
    pub jti: String,
    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,
    /// Login name
    pub username: String,
    /// Role at issuance
    pub role: UserRole,
    /// Access or refresh
    pub kind: TokenKind,
}

impl TokenClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// The identity part of the claims, without server-assigned fields
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.sub.clone(),
            username: self.username.clone(),
            role: self.role,
        }
    }
}

/// Who a token is minted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Minting failures (secret or encoder misconfiguration, not retryable)
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token lifetime out of range")]
    LifetimeOutOfRange,
}

/// Why a token was rejected
///
/// Callers treat every variant as an authentication failure; the split only
/// exists for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token format")]
    Malformed,
}

impl VerificationError {
    /// Short reason code for audit payloads
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::InvalidSignature => "invalid_signature",
            VerificationError::Expired => "expired",
            VerificationError::Malformed => "malformed",
        }
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Mints and verifies access/refresh tokens
pub struct TokenCodec {
    issuer: String,
    access: SigningKeys,
    refresh: SigningKeys,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from validated configuration
    ///
    /// Fails when a secret is missing, too short, or shared between kinds.
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            issuer: config.issuer.clone(),
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            clock,
        })
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Current time as seen by this codec
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Mint a token of `kind` for `subject`, valid for `ttl` from now
    ///
    /// A negative `ttl` yields a token that is already expired.
    pub fn mint(
        &self,
        subject: &TokenSubject,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::LifetimeOutOfRange)?;

        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.user_id.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            username: subject.username.clone(),
            role: subject.role,
            kind,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.keys(kind).encoding,
        )?;

        Ok(token)
    }

    /// Verify a token of the expected `kind`
    ///
    /// Checks run in order: signature, expiry (`now > exp`), then claim
    /// structure (kind, subject, issuer, timestamps).
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, VerificationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let payload = decode::<serde_json::Value>(token, &self.keys(kind).decoding, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    VerificationError::InvalidSignature
                }
                _ => VerificationError::Malformed,
            })?
            .claims;

        let exp = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or(VerificationError::Malformed)?;
        if self.clock.now().timestamp() > exp {
            return Err(VerificationError::Expired);
        }

        let claims: TokenClaims =
            serde_json::from_value(payload).map_err(|_| VerificationError::Malformed)?;

        if claims.kind != kind
            || claims.sub.is_empty()
            || claims.iss != self.issuer
            || claims.iat > claims.exp
        {
            return Err(VerificationError::Malformed);
        }

        Ok(claims)
    }

    /// Whether `token` can never verify again as either kind
    ///
    /// Used to decide when revocation entries are safe to drop.
    pub fn is_dead(&self, token: &str) -> bool {
        [TokenKind::Access, TokenKind::Refresh]
            .into_iter()
            .all(|kind| self.verify(token, kind).is_err())
    }
}

/// Read the claims of a token without checking its signature or expiry
///
/// The result is attacker-controlled. It is only fit for audit hints such as
/// recording which user a logout claimed to be for; never authorize on it.
pub fn decode_unsafe(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    const ACCESS: &str = "test-access-secret-0123456789abcdef";
    const REFRESH: &str = "test-refresh-secret-0123456789abcdef";

    fn codec_with_clock() -> (TokenCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = TokenCodec::new(&AuthConfig::with_secrets(ACCESS, REFRESH), clock.clone())
            .expect("valid config");
        (codec, clock)
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: "user-1".to_string(),
            username: "alice".to_string(),
            role: UserRole::Manager,
        }
    }

    #[test]
    fn test_mint_and_verify_token() {
        let (codec, clock) = codec_with_clock();

        let token = codec
            .mint(&subject(), TokenKind::Access, Duration::hours(1))
            .expect("Failed to mint token");
        let claims = codec
            .verify(&token, TokenKind::Access)
            .expect("Failed to verify token");

        assert_eq!(claims.subject(), subject());
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.iss, "till");
        assert_eq!(claims.iat, clock.now().timestamp());
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_token() {
        let (codec, _) = codec_with_clock();

        let token = codec
            .mint(&subject(), TokenKind::Access, Duration::seconds(-1))
            .unwrap();

        assert_eq!(
            codec.verify(&token, TokenKind::Access),
            Err(VerificationError::Expired)
        );
    }

    #[test]
    fn test_token_expires_when_clock_passes_exp() {
        let (codec, clock) = codec_with_clock();
        let token = codec
            .mint(&subject(), TokenKind::Access, Duration::seconds(60))
            .unwrap();

        clock.advance(Duration::seconds(60));
        assert!(codec.verify(&token, TokenKind::Access).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(
            codec.verify(&token, TokenKind::Access),
            Err(VerificationError::Expired)
        );
    }

    #[test]
    fn test_kinds_use_separate_secrets() {
        let (codec, _) = codec_with_clock();

        let refresh = codec
            .mint(&subject(), TokenKind::Refresh, Duration::days(30))
            .unwrap();
        let access = codec
            .mint(&subject(), TokenKind::Access, Duration::hours(1))
            .unwrap();

        assert_eq!(
            codec.verify(&refresh, TokenKind::Access),
            Err(VerificationError::InvalidSignature)
        );
        assert_eq!(
            codec.verify(&access, TokenKind::Refresh),
            Err(VerificationError::InvalidSignature)
        );
        assert!(codec.verify(&refresh, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn test_kind_claim_must_match_secret() {
        let (codec, _) = codec_with_clock();
        let now = codec.now().timestamp();

        // Refresh-kind claims signed with the access secret
        let forged = TokenClaims {
            iss: "till".to_string(),
            sub: "user-1".to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 60,
            username: "alice".to_string(),
            role: UserRole::Admin,
            kind: TokenKind::Refresh,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &forged,
            &EncodingKey::from_secret(ACCESS.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            codec.verify(&token, TokenKind::Access),
            Err(VerificationError::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let (codec, clock) = codec_with_clock();
        let other = TokenCodec::new(
            &AuthConfig::with_secrets(
                "another-access-secret-0123456789abcdef",
                "another-refresh-secret-0123456789abcdef",
            ),
            clock,
        )
        .unwrap();

        let token = other
            .mint(&subject(), TokenKind::Access, Duration::hours(1))
            .unwrap();

        assert_eq!(
            codec.verify(&token, TokenKind::Access),
            Err(VerificationError::InvalidSignature)
        );
    }

    #[test]
    fn test_invalid_token() {
        let (codec, _) = codec_with_clock();
        assert_eq!(
            codec.verify("invalid.token.here", TokenKind::Access),
            Err(VerificationError::Malformed)
        );
        assert_eq!(
            codec.verify("", TokenKind::Access),
            Err(VerificationError::Malformed)
        );
    }

    #[test]
    fn test_payload_without_expiry_is_malformed() {
        let (codec, _) = codec_with_clock();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({ "sub": "user-1", "kind": "access" }),
            &EncodingKey::from_secret(ACCESS.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            codec.verify(&token, TokenKind::Access),
            Err(VerificationError::Malformed)
        );
    }

    #[test]
    fn test_mint_produces_distinct_tokens() {
        let (codec, _) = codec_with_clock();
        let a = codec
            .mint(&subject(), TokenKind::Access, Duration::hours(1))
            .unwrap();
        let b = codec
            .mint(&subject(), TokenKind::Access, Duration::hours(1))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decode_unsafe_reads_expired_and_foreign_tokens() {
        let (codec, _) = codec_with_clock();
        let token = codec
            .mint(&subject(), TokenKind::Access, Duration::seconds(-30))
            .unwrap();

        let claims = decode_unsafe(&token).expect("claims readable");
        assert_eq!(claims.sub, "user-1");
        assert!(codec.verify(&token, TokenKind::Access).is_err());

        assert!(decode_unsafe("garbage").is_none());
    }

    #[test]
    fn test_is_dead() {
        let (codec, clock) = codec_with_clock();
        let refresh = codec
            .mint(&subject(), TokenKind::Refresh, Duration::hours(2))
            .unwrap();

        assert!(!codec.is_dead(&refresh));
        assert!(codec.is_dead("not-a-token"));

        clock.advance(Duration::hours(3));
        assert!(codec.is_dead(&refresh));
    }

    #[test]
    fn test_codec_rejects_bad_config() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        assert!(TokenCodec::new(&AuthConfig::with_secrets(ACCESS, ACCESS), clock.clone()).is_err());
        assert!(TokenCodec::new(&AuthConfig::default(), clock).is_err());
    }

    #[test]
    fn test_mint_rejects_lifetime_past_calendar_range() {
        let (codec, _) = codec_with_clock();

        let result = codec.mint(&subject(), TokenKind::Access, Duration::days(100_000_000));
        assert!(matches!(result, Err(TokenError::LifetimeOutOfRange)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(
            user_id in "[a-zA-Z0-9_-]{1,36}",
            username in "\\PC{1,40}",
            role in prop_oneof![
                Just(UserRole::Admin),
                Just(UserRole::Manager),
                Just(UserRole::Staff),
            ],
            ttl_secs in 1i64..(60 * 60 * 24 * 30),
            refresh in any::<bool>(),
        ) {
            let (codec, _) = codec_with_clock();
            let kind = if refresh { TokenKind::Refresh } else { TokenKind::Access };
            let subject = TokenSubject { user_id, username, role };

            let token = codec.mint(&subject, kind, Duration::seconds(ttl_secs)).unwrap();
            let claims = codec.verify(&token, kind).unwrap();

            prop_assert_eq!(claims.subject(), subject);
            prop_assert_eq!(claims.kind, kind);
            prop_assert_eq!(claims.exp - claims.iat, ttl_secs);
        }

        #[test]
        fn prop_tampered_token_never_verifies(index in any::<prop::sample::Index>()) {
            let (codec, _) = codec_with_clock();
            let token = codec.mint(&subject(), TokenKind::Access, Duration::hours(1)).unwrap();

            let mut bytes = token.into_bytes();
            let i = index.index(bytes.len());
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();

            let result = codec.verify(&tampered, TokenKind::Access);
            prop_assert!(matches!(
                result,
                Err(VerificationError::InvalidSignature) | Err(VerificationError::Malformed)
            ));
        }
    }
}
