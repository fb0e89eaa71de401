//! In-memory registry of live sessions
//!
//! Maps an opaque session id to the token pair issued at login. A secondary
//! index by access token serves the per-request cross-check. Both maps sit
//! behind one lock, so every operation is linearizable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Server-side record of one login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, Session>,
    by_access_token: HashMap<String, String>,
}

impl Inner {
    fn remove(&mut self, session_id: &str) -> Option<Session> {
        let session = self.by_id.remove(session_id)?;
        self.unindex(&session.access_token, session_id);
        Some(session)
    }

    /// Drop an index entry only while it still points at `session_id`
    fn unindex(&mut self, access_token: &str, session_id: &str) {
        if self.by_access_token.get(access_token).map(String::as_str) == Some(session_id) {
            self.by_access_token.remove(access_token);
        }
    }
}

/// Concurrency-safe session store
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session and return its id
    ///
    /// Ids combine the user id, creation time and a per-registry counter, so
    /// concurrent logins never collide.
    pub fn create(&self, user_id: &str, access_token: &str, refresh_token: &str) -> String {
        let created_at = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("{user_id}-{}-{seq}", created_at.timestamp_millis());

        let session = Session {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            created_at,
        };

        let mut inner = self.write();
        inner
            .by_access_token
            .insert(session.access_token.clone(), session_id.clone());
        inner.by_id.insert(session_id.clone(), session);

        session_id
    }

    pub fn find_by_access_token(&self, access_token: &str) -> Option<Session> {
        let inner = self.read();
        inner
            .by_access_token
            .get(access_token)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<Session> {
        self.read().by_id.get(session_id).cloned()
    }

    /// Remove the session holding `access_token`; returns whether one existed
    pub fn remove_by_access_token(&self, access_token: &str) -> bool {
        let mut inner = self.write();
        match inner.by_access_token.get(access_token).cloned() {
            Some(id) => inner.remove(&id).is_some(),
            None => false,
        }
    }

    /// Remove the session issued with `refresh_token`; returns whether one existed
    pub fn remove_by_refresh_token(&self, refresh_token: &str) -> bool {
        let mut inner = self.write();
        let id = inner
            .by_id
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .map(|s| s.session_id.clone());
        match id {
            Some(id) => inner.remove(&id).is_some(),
            None => false,
        }
    }

    pub fn remove_by_id(&self, session_id: &str) -> Option<Session> {
        self.write().remove(session_id)
    }

    /// Remove a session only if it still holds `access_token`
    ///
    /// Lets a sweep act on a snapshot without deleting a session whose
    /// token was replaced after the snapshot was taken.
    pub fn remove_if_access_token(&self, session_id: &str, access_token: &str) -> bool {
        let mut inner = self.write();
        let matches = inner
            .by_id
            .get(session_id)
            .is_some_and(|s| s.access_token == access_token);
        matches && inner.remove(session_id).is_some()
    }

    /// Point the session issued with `refresh_token` at a newly minted access token
    ///
    /// Returns the session id, or `None` when no session holds that refresh token.
    pub fn replace_access_token(&self, refresh_token: &str, access_token: &str) -> Option<String> {
        let mut inner = self.write();
        let inner = &mut *inner;

        let session = inner
            .by_id
            .values_mut()
            .find(|s| s.refresh_token == refresh_token)?;
        let session_id = session.session_id.clone();
        let previous = std::mem::replace(&mut session.access_token, access_token.to_string());

        inner.unindex(&previous, &session_id);
        inner
            .by_access_token
            .insert(access_token.to_string(), session_id.clone());

        Some(session_id)
    }

    /// All sessions belonging to `user_id`
    pub fn find_by_user(&self, user_id: &str) -> Vec<Session> {
        self.read()
            .by_id
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Visit a snapshot of all sessions
    ///
    /// The lock is released before `f` runs, so `f` may call back into the
    /// registry, and sessions removed meanwhile are still visited.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Session),
    {
        let snapshot: Vec<Session> = self.read().by_id.values().cloned().collect();
        for session in &snapshot {
            f(session);
        }
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_create_and_find() {
        let registry = SessionRegistry::new();
        let id = registry.create("user-1", "access-1", "refresh-1");

        let session = registry.find_by_access_token("access-1").expect("session");
        assert_eq!(session.session_id, id);
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.refresh_token, "refresh-1");
        assert!(id.starts_with("user-1-"));
        assert_eq!(registry.find_by_id(&id), Some(session));
        assert!(registry.find_by_access_token("access-2").is_none());
    }

    #[test]
    fn test_remove_by_access_token() {
        let registry = SessionRegistry::new();
        registry.create("user-1", "access-1", "refresh-1");

        assert!(registry.remove_by_access_token("access-1"));
        assert!(!registry.remove_by_access_token("access-1"));
        assert!(registry.find_by_access_token("access-1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_by_refresh_token() {
        let registry = SessionRegistry::new();
        registry.create("user-1", "access-1", "refresh-1");

        assert!(registry.remove_by_refresh_token("refresh-1"));
        assert!(registry.find_by_access_token("access-1").is_none());
        assert!(!registry.remove_by_refresh_token("refresh-1"));
    }

    #[test]
    fn test_remove_by_id() {
        let registry = SessionRegistry::new();
        let id = registry.create("user-1", "access-1", "refresh-1");

        let removed = registry.remove_by_id(&id).expect("removed");
        assert_eq!(removed.access_token, "access-1");
        assert!(registry.find_by_access_token("access-1").is_none());
        assert!(registry.remove_by_id(&id).is_none());
    }

    #[test]
    fn test_removing_stale_session_keeps_newer_index_entry() {
        let registry = SessionRegistry::new();
        let older = registry.create("user-1", "shared-access", "refresh-1");
        let newer = registry.create("user-1", "shared-access", "refresh-2");

        assert!(registry.remove_by_id(&older).is_some());
        assert_eq!(
            registry
                .find_by_access_token("shared-access")
                .map(|s| s.session_id),
            Some(newer.clone())
        );

        assert!(registry.remove_by_access_token("shared-access"));
        assert!(registry.find_by_id(&newer).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replacing_stale_token_keeps_newer_index_entry() {
        let registry = SessionRegistry::new();
        registry.create("user-1", "shared-access", "refresh-1");
        let newer = registry.create("user-1", "shared-access", "refresh-2");

        registry.replace_access_token("refresh-1", "access-3");
        assert_eq!(
            registry
                .find_by_access_token("shared-access")
                .map(|s| s.session_id),
            Some(newer)
        );
    }

    #[test]
    fn test_replace_access_token() {
        let registry = SessionRegistry::new();
        let id = registry.create("user-1", "access-1", "refresh-1");

        assert_eq!(
            registry.replace_access_token("refresh-1", "access-2"),
            Some(id.clone())
        );
        assert!(registry.find_by_access_token("access-1").is_none());
        assert_eq!(
            registry.find_by_access_token("access-2").map(|s| s.session_id),
            Some(id)
        );
        assert_eq!(registry.replace_access_token("refresh-x", "access-3"), None);
    }

    #[test]
    fn test_remove_if_access_token() {
        let registry = SessionRegistry::new();
        let id = registry.create("user-1", "access-1", "refresh-1");
        registry.replace_access_token("refresh-1", "access-2");

        assert!(!registry.remove_if_access_token(&id, "access-1"));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_if_access_token(&id, "access-2"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_user() {
        let registry = SessionRegistry::new();
        registry.create("user-1", "a1", "r1");
        registry.create("user-1", "a2", "r2");
        registry.create("user-2", "a3", "r3");

        let mut tokens: Vec<_> = registry
            .find_by_user("user-1")
            .into_iter()
            .map(|s| s.access_token)
            .collect();
        tokens.sort();
        assert_eq!(tokens, vec!["a1", "a2"]);
        assert!(registry.find_by_user("user-3").is_empty());
    }

    #[test]
    fn test_for_each_tolerates_removal() {
        let registry = SessionRegistry::new();
        registry.create("user-1", "a1", "r1");
        registry.create("user-2", "a2", "r2");

        let mut visited = 0;
        registry.for_each(|session| {
            visited += 1;
            registry.remove_by_id(&session.session_id);
        });

        assert_eq!(visited, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_creates_never_collide() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.create("user-1", &format!("a{t}-{i}"), "r"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 400);
        assert_eq!(registry.len(), 400);
    }
}
