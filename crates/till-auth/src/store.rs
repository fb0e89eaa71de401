//! Credential store contract and the bundled in-memory implementation
//!
//! The auth core never sees password hashes: it asks a [`CredentialStore`]
//! to check credentials, load users and change passwords. Production
//! deployments back this with their user database; [`MemoryCredentialStore`]
//! serves tests, the CLI and single-terminal installs.

use crate::password::{Argon2Hasher, HashingConfig, PasswordError, StrengthPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use till_core::{User, UserRole};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Credential store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Unknown user, wrong password or disabled account (deliberately not split)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Request refused with a reason that is safe to show the user
    #[error("{0}")]
    Rejected(String),

    /// Store could not be reached or is misconfigured
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

impl From<PasswordError> for CredentialError {
    fn from(err: PasswordError) -> Self {
        CredentialError::Unavailable(err.to_string())
    }
}

/// User lookups and password checks the auth core depends on
///
/// Calls may block on I/O. Callers enforce timeouts by wrapping the returned
/// future; dropping it cancels the call.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Return the user if `username`/`password` match an active account
    async fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, CredentialError>;

    /// Load a user by id; `Ok(None)` when the user no longer exists
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, CredentialError>;

    /// Replace the password of `user_id` after checking `current_password`
    async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), CredentialError>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

/// Users file entry
#[derive(Debug, Deserialize)]
struct UserEntry {
    id: String,
    username: String,
    role: UserRole,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default = "default_true")]
    is_active: bool,
    /// Argon2 PHC hash
    #[serde(default)]
    password_hash: Option<String>,
    /// Plaintext, hashed at load time (development only)
    #[serde(default)]
    password: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<UserEntry>,
}

/// Argon2-backed store that keeps users in memory
#[derive(Debug)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, StoredUser>>,
    hasher: Argon2Hasher,
    policy: StrengthPolicy,
    // Checked against for unknown usernames so lookups take similar time
    dummy_hash: String,
}

impl MemoryCredentialStore {
    pub fn new(hashing: &HashingConfig, policy: StrengthPolicy) -> Result<Self, CredentialError> {
        let hasher = Argon2Hasher::new(hashing)?;
        let dummy_hash = hasher.hash("till-dummy-password")?;

        Ok(Self {
            users: RwLock::new(HashMap::new()),
            hasher,
            policy,
            dummy_hash,
        })
    }

    /// Parse a TOML users file
    ///
    /// ```toml
    /// [[users]]
    /// id = "u-1"
    /// username = "alice"
    /// role = "manager"
    /// password_hash = "$argon2id$v=19$..."
    /// ```
    pub async fn from_toml_str(
        content: &str,
        hashing: &HashingConfig,
        policy: StrengthPolicy,
    ) -> Result<Self, CredentialError> {
        let file: UsersFile = toml::from_str(content)
            .map_err(|e| CredentialError::Unavailable(format!("invalid users file: {e}")))?;

        let store = Self::new(hashing, policy)?;
        for entry in file.users {
            let password_hash = match (entry.password_hash, entry.password) {
                (Some(hash), _) => {
                    Argon2Hasher::check_format(&hash).map_err(|_| {
                        CredentialError::Unavailable(format!(
                            "user {} has an invalid password_hash",
                            entry.username
                        ))
                    })?;
                    hash
                }
                (None, Some(password)) => store.hasher.hash(&password)?,
                (None, None) => {
                    return Err(CredentialError::Unavailable(format!(
                        "user {} has neither password nor password_hash",
                        entry.username
                    )))
                }
            };

            let user = User {
                id: entry.id,
                username: entry.username,
                display_name: entry.display_name,
                role: entry.role,
                is_active: entry.is_active,
            };
            store.insert_hashed(user, password_hash).await?;
        }

        Ok(store)
    }

    pub async fn load(
        path: impl AsRef<Path>,
        hashing: &HashingConfig,
        policy: StrengthPolicy,
    ) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CredentialError::Unavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content, hashing, policy).await
    }

    /// Add a user with a plaintext password (not subject to the strength policy)
    pub async fn add_user(&self, user: User, password: &str) -> Result<(), CredentialError> {
        let password_hash = self.hasher.hash(password)?;
        self.insert_hashed(user, password_hash).await
    }

    async fn insert_hashed(&self, user: User, password_hash: String) -> Result<(), CredentialError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.user.username == user.username) {
            return Err(CredentialError::Rejected(format!(
                "username {} already exists",
                user.username
            )));
        }
        if users.contains_key(&user.id) {
            return Err(CredentialError::Rejected(format!(
                "user id {} already exists",
                user.id
            )));
        }

        users.insert(
            user.id.clone(),
            StoredUser {
                user,
                password_hash,
            },
        );
        Ok(())
    }

    /// Delete a user; later lookups by id return `None`
    pub async fn remove_user(&self, user_id: &str) -> Option<User> {
        self.users.write().await.remove(user_id).map(|s| s.user)
    }

    pub async fn set_active(&self, user_id: &str, active: bool) -> bool {
        match self.users.write().await.get_mut(user_id) {
            Some(stored) => {
                stored.user.is_active = active;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, CredentialError> {
        let stored = self
            .users
            .read()
            .await
            .values()
            .find(|s| s.user.username == username)
            .cloned();

        let Some(stored) = stored else {
            // Burn the same hashing work as a real check
            let _ = self.hasher.verify(password, &self.dummy_hash);
            debug!(username, "Unknown username");
            return Err(CredentialError::InvalidCredentials);
        };

        // A corrupt stored hash must look like any other failed login
        let matches = match self.hasher.verify(password, &stored.password_hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(user_id = %stored.user.id, error = %e, "Stored password hash is unusable");
                false
            }
        };
        if !matches {
            return Err(CredentialError::InvalidCredentials);
        }
        if !stored.user.is_active {
            debug!(user_id = %stored.user.id, "Login attempt on inactive account");
            return Err(CredentialError::InvalidCredentials);
        }

        Ok(stored.user)
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, CredentialError> {
        Ok(self.users.read().await.get(user_id).map(|s| s.user.clone()))
    }

    async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        let current_hash = self
            .users
            .read()
            .await
            .get(user_id)
            .map(|s| s.password_hash.clone())
            .ok_or_else(|| CredentialError::Rejected("user not found".to_string()))?;

        if !self.hasher.verify(current_password, &current_hash)? {
            return Err(CredentialError::Rejected(
                "current password is incorrect".to_string(),
            ));
        }
        if current_password == new_password {
            return Err(CredentialError::Rejected(
                "new password must differ from the current password".to_string(),
            ));
        }
        self.policy
            .check(new_password)
            .map_err(|problems| CredentialError::Rejected(format!("new password {}", problems.join(", "))))?;

        let new_hash = self.hasher.hash(new_password)?;

        let mut users = self.users.write().await;
        let stored = users
            .get_mut(user_id)
            .ok_or_else(|| CredentialError::Rejected("user not found".to_string()))?;
        // Another change may have landed while hashing
        if stored.password_hash != current_hash {
            return Err(CredentialError::Rejected(
                "password was changed concurrently".to_string(),
            ));
        }
        stored.password_hash = new_hash;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_alice() -> MemoryCredentialStore {
        let store =
            MemoryCredentialStore::new(&HashingConfig::fast(), StrengthPolicy::default()).unwrap();
        store
            .add_user(User::new("u-1", "alice", UserRole::Manager), "Correct-pw1")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_by_credentials() {
        let store = store_with_alice().await;

        let user = store
            .find_by_credentials("alice", "Correct-pw1")
            .await
            .unwrap();
        assert_eq!(user.id, "u-1");

        assert_eq!(
            store.find_by_credentials("alice", "wrong").await,
            Err(CredentialError::InvalidCredentials)
        );
        assert_eq!(
            store.find_by_credentials("bob", "Correct-pw1").await,
            Err(CredentialError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_log_in() {
        let store = store_with_alice().await;
        assert!(store.set_active("u-1", false).await);

        assert_eq!(
            store.find_by_credentials("alice", "Correct-pw1").await,
            Err(CredentialError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = store_with_alice().await;
        let result = store
            .add_user(User::new("u-2", "alice", UserRole::Staff), "Other-pw1")
            .await;
        assert!(matches!(result, Err(CredentialError::Rejected(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_change_password() {
        let store = store_with_alice().await;

        store
            .change_password("u-1", "Correct-pw1", "Brand-new-pw2")
            .await
            .unwrap();

        assert!(store
            .find_by_credentials("alice", "Correct-pw1")
            .await
            .is_err());
        assert!(store
            .find_by_credentials("alice", "Brand-new-pw2")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_change_password_rejections() {
        let store = store_with_alice().await;

        let wrong_current = store.change_password("u-1", "nope", "Brand-new-pw2").await;
        assert_eq!(
            wrong_current,
            Err(CredentialError::Rejected(
                "current password is incorrect".to_string()
            ))
        );

        let weak = store.change_password("u-1", "Correct-pw1", "short").await;
        assert!(matches!(weak, Err(CredentialError::Rejected(reason)) if reason.contains("at least 8")));

        let same = store
            .change_password("u-1", "Correct-pw1", "Correct-pw1")
            .await;
        assert!(matches!(same, Err(CredentialError::Rejected(_))));

        let missing = store.change_password("u-9", "x", "Brand-new-pw2").await;
        assert!(matches!(missing, Err(CredentialError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_from_toml_str() {
        let hasher = Argon2Hasher::new(&HashingConfig::fast()).unwrap();
        let bob_hash = hasher.hash("Bob-secret1").unwrap();
        let content = format!(
            r#"
[[users]]
id = "u-1"
username = "alice"
role = "admin"
display_name = "Alice"
password = "Correct-pw1"

[[users]]
id = "u-2"
username = "bob"
role = "staff"
password_hash = "{bob_hash}"
is_active = false
"#
        );

        let store = MemoryCredentialStore::from_toml_str(
            &content,
            &HashingConfig::fast(),
            StrengthPolicy::default(),
        )
        .await
        .unwrap();

        let alice = store
            .find_by_credentials("alice", "Correct-pw1")
            .await
            .unwrap();
        assert_eq!(alice.role, UserRole::Admin);
        assert_eq!(alice.display_name.as_deref(), Some("Alice"));

        let bob = store.find_by_id("u-2").await.unwrap().unwrap();
        assert!(!bob.is_active);
    }

    #[tokio::test]
    async fn test_from_toml_str_requires_password() {
        let content = r#"
[[users]]
id = "u-1"
username = "alice"
role = "admin"
"#;
        let result = MemoryCredentialStore::from_toml_str(
            content,
            &HashingConfig::fast(),
            StrengthPolicy::default(),
        )
        .await;
        assert!(matches!(result, Err(CredentialError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_from_toml_str_rejects_malformed_hash() {
        let malformed = [
            "not-a-hash",
            "$pbkdf2-sha256$i=1000$c2FsdA$aGFzaA",
            "$argon2id$v=19$m=1024,t=1,p=1$c2FsdHNhbHQ",
        ];
        for hash in malformed {
            let content = format!(
                r#"
[[users]]
id = "u-1"
username = "alice"
role = "admin"
password_hash = "{hash}"
"#
            );
            let result = MemoryCredentialStore::from_toml_str(
                &content,
                &HashingConfig::fast(),
                StrengthPolicy::default(),
            )
            .await;
            match result {
                Err(CredentialError::Unavailable(msg)) => {
                    assert!(msg.contains("invalid password_hash"), "{msg}")
                }
                other => panic!("{hash} was accepted: {:?}", other.map(|_| ())),
            }
        }
    }

    #[tokio::test]
    async fn test_corrupt_stored_hash_looks_like_wrong_password() {
        let store = store_with_alice().await;
        store
            .insert_hashed(User::new("u-2", "bob", UserRole::Staff), "garbage".to_string())
            .await
            .unwrap();

        assert_eq!(
            store.find_by_credentials("bob", "Bob-secret1").await,
            Err(CredentialError::InvalidCredentials)
        );
        assert_eq!(
            store.find_by_credentials("carol", "Bob-secret1").await,
            Err(CredentialError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_remove_user() {
        let store = store_with_alice().await;
        assert!(store.remove_user("u-1").await.is_some());
        assert_eq!(store.find_by_id("u-1").await, Ok(None));
        assert!(store.is_empty().await);
    }
}
