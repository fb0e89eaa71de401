//! In-memory token revocation list
//!
//! Stores the exact token strings invalidated by logout or a password-change
//! policy. A revoked token stays rejected until it would have expired anyway,
//! at which point [`RevocationList::sweep`] may drop it.
//!
//! [`UserCutoffs`] covers tokens the service no longer holds a copy of: after
//! a password change, every token of that user issued before the change is
//! rejected unless it belongs to the exempted session.
//!
//! # Thread Safety
//!
//! A single `RwLock` guards the set. The sweep predicate runs against a
//! snapshot with no lock held, so slow predicates never stall `add`/`contains`.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

/// Set of revoked token strings
#[derive(Debug, Default)]
pub struct RevocationList {
    tokens: RwLock<HashSet<String>>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke a token. Revoking twice is a no-op.
    pub fn add(&self, token: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string());
    }

    /// Check if a token has been revoked
    pub fn contains(&self, token: &str) -> bool {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry `is_expired` reports as past its natural lifetime
    ///
    /// Returns the number of entries removed.
    pub fn sweep<F>(&self, is_expired: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let snapshot: Vec<String> = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        let expired: Vec<String> = snapshot
            .into_iter()
            .filter(|token| is_expired(token))
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        expired
            .iter()
            .filter(|token| tokens.remove(token.as_str()))
            .count()
    }
}

/// Per-user "issued before" cutoffs
#[derive(Debug, Default)]
pub struct UserCutoffs {
    entries: RwLock<HashMap<String, Cutoff>>,
}

#[derive(Debug)]
struct Cutoff {
    /// Unix seconds; tokens with an earlier `iat` are rejected
    not_before: i64,
    exempt: HashSet<String>,
}

impl UserCutoffs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject tokens of `user_id` issued before `not_before`, except `exempt`
    ///
    /// Replaces any earlier cutoff for the user, including its exemptions.
    pub fn set<I>(&self, user_id: &str, not_before: i64, exempt: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                user_id.to_string(),
                Cutoff {
                    not_before,
                    exempt: exempt.into_iter().collect(),
                },
            );
    }

    /// Whether `token`, issued to `user_id` at `issued_at`, predates a cutoff
    ///
    /// Tokens issued in the same second as the cutoff pass.
    pub fn is_cut_off(&self, user_id: &str, issued_at: i64, token: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .is_some_and(|cutoff| issued_at < cutoff.not_before && !cutoff.exempt.contains(token))
    }

    /// Drop cutoffs set before `before`, returning how many were removed
    ///
    /// Safe once every token issued before the cutoff must have expired.
    pub fn prune(&self, before: i64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let len = entries.len();
        entries.retain(|_, cutoff| cutoff.not_before >= before);
        len - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
