//! Password hashing and strength policy for the bundled credential store
//!
//! Hashes are Argon2id PHC strings (algorithm, parameters and salt are
//! embedded, so no separate salt storage is needed).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Password hashing errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl HashingConfig {
    /// Cheap parameters for tests and local tooling
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Argon2id hasher with fixed cost parameters
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Hasher")
            .field("params", self.argon2.params())
            .finish()
    }
}

impl Argon2Hasher {
    pub fn new(config: &HashingConfig) -> Result<Self, PasswordError> {
        let params = Params::new(config.memory_cost, config.time_cost, config.parallelism, None)
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        })
    }

    /// Hash a plaintext password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }

    /// Check that `hash` is an Argon2 PHC string this hasher can verify against
    pub fn check_format(hash: &str) -> Result<(), PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;
        argon2::Algorithm::try_from(parsed.algorithm)
            .map_err(|_| PasswordError::InvalidHashFormat)?;
        Params::try_from(&parsed).map_err(|_| PasswordError::InvalidHashFormat)?;
        if parsed.hash.is_none() {
            return Err(PasswordError::InvalidHashFormat);
        }
        Ok(())
    }

    /// Check a plaintext password against a stored PHC hash
    ///
    /// Parameters embedded in the hash take precedence over this hasher's.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }
}

/// Minimum requirements for a new password
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
}

impl Default for StrengthPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: false,
        }
    }
}

impl StrengthPolicy {
    /// Check `password`, returning every unmet requirement
    pub fn check(&self, password: &str) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if password.chars().count() < self.min_length {
            problems.push(format!(
                "must be at least {} characters long",
                self.min_length
            ));
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            problems.push("must contain an uppercase letter".to_string());
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            problems.push("must contain a lowercase letter".to_string());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            problems.push("must contain a digit".to_string());
        }
        if self.require_symbol && password.chars().all(char::is_alphanumeric) {
            problems.push("must contain a symbol".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::new(&HashingConfig::fast()).unwrap()
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hasher = hasher();
        let hash = hasher.hash("Correct-pw1").expect("Failed to hash password");

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Correct-pw1", &hash).unwrap());
        assert!(!hasher.verify("wrong-pw", &hash).unwrap());
    }

    #[test]
    fn test_same_password_produces_different_hashes() {
        let hasher = hasher();
        let hash1 = hasher.hash("SamePassword1").unwrap();
        let hash2 = hasher.hash("SamePassword1").unwrap();

        assert_ne!(hash1, hash2);
        assert!(hasher.verify("SamePassword1", &hash1).unwrap());
        assert!(hasher.verify("SamePassword1", &hash2).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        let result = hasher().verify("password", "invalid-hash-format");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat)));
    }

    #[test]
    fn test_check_format() {
        let hash = hasher().hash("TestPassword1").unwrap();
        assert!(Argon2Hasher::check_format(&hash).is_ok());

        for bad in ["", "invalid-hash-format", "$argon2id$v=19$m=1024,t=1,p=1"] {
            assert!(matches!(
                Argon2Hasher::check_format(bad),
                Err(PasswordError::InvalidHashFormat)
            ));
        }
    }

    #[test]
    fn test_hash_embeds_parameters() {
        let hash = hasher().hash("TestPassword1").unwrap();
        assert!(hash.contains("m=1024"));
        assert!(hash.contains("t=1"));
        assert!(hash.contains("p=1"));
    }

    #[test]
    fn test_strength_policy_reports_every_problem() {
        let policy = StrengthPolicy::default();

        assert!(policy.check("Abcdefg1").is_ok());

        let problems = policy.check("abc").unwrap_err();
        assert_eq!(problems.len(), 3); // length, uppercase, digit

        let strict = StrengthPolicy {
            require_symbol: true,
            ..Default::default()
        };
        assert!(strict.check("Abcdefg1").is_err());
        assert!(strict.check("Abcdefg1!").is_ok());
    }
}
