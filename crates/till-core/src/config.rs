//! till Configuration Management
//!
//! Handles configuration from environment variables and TOML files.
//! Token secrets have no defaults: a service cannot be built until both are
//! supplied, which keeps secret misconfiguration a startup-time failure.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum secret length in bytes (256 bits for HS256)
pub const MIN_SECRET_LEN: usize = 32;

/// Longest accepted token lifetime or cleanup interval (ten years)
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Token and session configuration
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Secrets always come from env when present
        if let Ok(secret) = std::env::var("TILL_ACCESS_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("TILL_REFRESH_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Ok(issuer) = std::env::var("TILL_ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(ttl) = parse_env("TILL_ACCESS_TTL_SECS")? {
            self.auth.access_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_env("TILL_REFRESH_TTL_SECS")? {
            self.auth.refresh_ttl_secs = ttl;
        }
        if let Some(interval) = parse_env("TILL_CLEANUP_INTERVAL_SECS")? {
            self.auth.cleanup_interval_secs = interval;
        }
        if let Some(policy) = parse_env("TILL_PASSWORD_CHANGE_POLICY")? {
            self.auth.password_change_policy = policy;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// What happens to a user's other sessions after a successful password change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordChangePolicy {
    /// Leave every session valid until natural expiry
    KeepSessions,
    /// Revoke every session of the user except the one that made the change
    #[default]
    RevokeOthers,
    /// Revoke every session of the user, including the caller's
    RevokeAll,
}

impl std::str::FromStr for PasswordChangePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "keep_sessions" | "keep" => Ok(Self::KeepSessions),
            "revoke_others" => Ok(Self::RevokeOthers),
            "revoke_all" => Ok(Self::RevokeAll),
            _ => Err(ConfigError::InvalidValue {
                key: "TILL_PASSWORD_CHANGE_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Token and session configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer claim written into and required from every token
    pub issuer: String,

    /// HMAC secret for access tokens
    pub access_secret: String,

    /// HMAC secret for refresh tokens (must differ from the access secret)
    pub refresh_secret: String,

    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,

    /// Interval between background cleanup sweeps in seconds
    pub cleanup_interval_secs: u64,

    /// Session handling after a password change
    pub password_change_policy: PasswordChangePolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "till".to_string(),
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_ttl_secs: 60 * 60, // 1 hour
            refresh_ttl_secs: 30 * 24 * 60 * 60, // 30 days
            cleanup_interval_secs: 5 * 60, // 5 minutes
            password_change_policy: PasswordChangePolicy::default(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("password_change_policy", &self.password_change_policy)
            .finish()
    }
}

impl AuthConfig {
    /// Build a config with the given secrets and default lifetimes
    pub fn with_secrets(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            ..Default::default()
        }
    }

    /// Check the settings a running service cannot recover from
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, secret) in [
            ("auth.access_secret", &self.access_secret),
            ("auth.refresh_secret", &self.refresh_secret),
        ] {
            if secret.is_empty() {
                return Err(ConfigError::MissingRequired(key.to_string()));
            }
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::WeakSecret {
                    key: key.to_string(),
                    min_len: MIN_SECRET_LEN,
                });
            }
        }

        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::SharedSecret);
        }

        for (key, value) in [
            ("auth.access_ttl_secs", self.access_ttl_secs),
            ("auth.refresh_ttl_secs", self.refresh_ttl_secs),
            ("auth.cleanup_interval_secs", self.cleanup_interval_secs),
        ] {
            if value == 0 || value > MAX_TTL_SECS {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        if self.issuer.is_empty() {
            return Err(ConfigError::MissingRequired("auth.issuer".to_string()));
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Secret {key} must be at least {min_len} bytes")]
    WeakSecret { key: String, min_len: usize },

    #[error("Access and refresh tokens must use different secrets")]
    SharedSecret,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ACCESS: &str = "access-secret-access-secret-access-secret";
    const REFRESH: &str = "refresh-secret-refresh-secret-refresh-secret";

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.auth.access_ttl_secs, 3600);
        assert_eq!(config.auth.refresh_ttl_secs, 2_592_000);
        assert_eq!(config.auth.issuer, "till");
        assert_eq!(
            config.auth.password_change_policy,
            PasswordChangePolicy::RevokeOthers
        );
    }

    #[test]
    fn test_validate_requires_secrets() {
        let config = AuthConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validate_rejects_short_and_shared_secrets() {
        let short = AuthConfig::with_secrets("short", REFRESH);
        assert!(matches!(
            short.validate(),
            Err(ConfigError::WeakSecret { .. })
        ));

        let shared = AuthConfig::with_secrets(ACCESS, ACCESS);
        assert!(matches!(shared.validate(), Err(ConfigError::SharedSecret)));

        assert!(AuthConfig::with_secrets(ACCESS, REFRESH).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = AuthConfig::with_secrets(ACCESS, REFRESH);
        config.access_ttl_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_ttl() {
        let mut config = AuthConfig::with_secrets(ACCESS, REFRESH);
        config.access_ttl_secs = MAX_TTL_SECS;
        assert!(config.validate().is_ok());

        config.access_ttl_secs = 10_000_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "auth.access_ttl_secs"
        ));

        let mut config = AuthConfig::with_secrets(ACCESS, REFRESH);
        config.refresh_ttl_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_change_policy_parse() {
        assert_eq!(
            "revoke-all".parse::<PasswordChangePolicy>().unwrap(),
            PasswordChangePolicy::RevokeAll
        );
        assert_eq!(
            "keep_sessions".parse::<PasswordChangePolicy>().unwrap(),
            PasswordChangePolicy::KeepSessions
        );
        assert!("sometimes".parse::<PasswordChangePolicy>().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AuthConfig::with_secrets(ACCESS, REFRESH);
        let debug = format!("{config:?}");
        assert!(!debug.contains(ACCESS));
        assert!(!debug.contains(REFRESH));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[auth]
access_secret = "{ACCESS}"
refresh_secret = "{REFRESH}"
access_ttl_secs = 900
password_change_policy = "revoke_all"

[logging]
json_format = true
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.auth.access_ttl_secs, 900);
        assert_eq!(config.auth.refresh_ttl_secs, 2_592_000);
        assert_eq!(
            config.auth.password_change_policy,
            PasswordChangePolicy::RevokeAll
        );
        assert!(config.logging.json_format);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_missing_file() {
        let result = AppConfig::from_file("/nonexistent/till.toml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }
}
