//! Policy store
//!
//! One [`AuthorizationSession`] per owner. Counters change only through
//! [`PolicyStore::commit`], a compare-and-swap on the session `version`;
//! every other write bumps the version too, so a commit computed against a
//! session that has since been revoked or replaced always conflicts.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use stockeasy_types::{
    AuthorizationSession, OwnerId, SessionId, SessionStatus, SpendCounters, StockEasyError,
};
use thiserror::Error;

/// Policy store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("No session for owner {owner}")]
    NotFound { owner: OwnerId },

    #[error("Session {session_id} is terminal and cannot be replaced")]
    SessionTerminal { session_id: SessionId },

    #[error(transparent)]
    Invalid(#[from] StockEasyError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "SESSION_NOT_FOUND",
            Self::SessionTerminal { .. } => "SESSION_TERMINAL",
            Self::Invalid(e) => e.error_code(),
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }

    pub fn not_found(owner: &OwnerId) -> Self {
        Self::NotFound {
            owner: owner.clone(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a compare-and-swap commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// Counters written; the session is now at `version`
    Committed { version: u64 },
    /// Someone wrote first; nothing was changed
    Conflict { current_version: u64 },
}

/// Durable mapping from owner to authorization session
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load the owner's session
    async fn get(&self, owner: &OwnerId) -> Result<AuthorizationSession>;

    /// Create or replace the owner's session (admin interface)
    ///
    /// A terminal session can only be replaced by one with a new
    /// `session_id`. Returns the stored session with its new version.
    async fn put(&self, session: AuthorizationSession) -> Result<AuthorizationSession>;

    /// Replace the counters if the session is still at `expected_version`
    async fn commit(
        &self,
        owner: &OwnerId,
        expected_version: u64,
        counters: SpendCounters,
    ) -> Result<CommitResult>;

    /// `Active -> Revoked`; terminal sessions are left as they are
    async fn revoke(&self, owner: &OwnerId) -> Result<SessionStatus>;

    /// `Active -> Expired`; terminal sessions are left as they are
    async fn expire(&self, owner: &OwnerId) -> Result<SessionStatus>;

    /// Every stored session
    async fn list(&self) -> Result<Vec<AuthorizationSession>>;
}

/// Apply an admin write on top of whatever is currently stored
pub(crate) fn prepare_put(
    existing: Option<&AuthorizationSession>,
    mut session: AuthorizationSession,
) -> Result<AuthorizationSession> {
    session.validate()?;
    match existing {
        Some(current)
            if current.session_id == session.session_id && current.status.is_terminal() =>
        {
            Err(StoreError::SessionTerminal {
                session_id: current.session_id.clone(),
            })
        }
        Some(current) => {
            session.version = current.version + 1;
            Ok(session)
        }
        None => {
            session.version = 0;
            Ok(session)
        }
    }
}

/// Move an active session to `target`; returns whether anything changed
pub(crate) fn transition(session: &mut AuthorizationSession, target: SessionStatus) -> bool {
    if session.status.is_terminal() {
        return false;
    }
    session.status = target;
    session.version += 1;
    true
}

/// In-memory store
///
/// Each owner's entry lives in one `DashMap` shard; the compare-and-swap
/// runs under that shard's write lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    sessions: Arc<DashMap<OwnerId, AuthorizationSession>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with sessions, keyed by their owner
    pub fn with_sessions(sessions: impl IntoIterator<Item = AuthorizationSession>) -> Self {
        let store = Self::new();
        for session in sessions {
            store.sessions.insert(session.owner_id.clone(), session);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, owner: &OwnerId) -> Result<AuthorizationSession> {
        self.sessions
            .get(owner)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::not_found(owner))
    }

    async fn put(&self, session: AuthorizationSession) -> Result<AuthorizationSession> {
        let stored = match self.sessions.entry(session.owner_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = prepare_put(Some(occupied.get()), session)?;
                occupied.insert(stored.clone());
                stored
            }
            Entry::Vacant(vacant) => {
                let stored = prepare_put(None, session)?;
                vacant.insert(stored.clone());
                stored
            }
        };
        tracing::info!(
            owner = %stored.owner_id,
            session = %stored.session_id,
            version = stored.version,
            "session stored"
        );
        Ok(stored)
    }

    async fn commit(
        &self,
        owner: &OwnerId,
        expected_version: u64,
        counters: SpendCounters,
    ) -> Result<CommitResult> {
        let mut entry = self
            .sessions
            .get_mut(owner)
            .ok_or_else(|| StoreError::not_found(owner))?;
        if entry.version != expected_version {
            return Ok(CommitResult::Conflict {
                current_version: entry.version,
            });
        }
        entry.counters = counters;
        entry.version += 1;
        Ok(CommitResult::Committed {
            version: entry.version,
        })
    }

    async fn revoke(&self, owner: &OwnerId) -> Result<SessionStatus> {
        let mut entry = self
            .sessions
            .get_mut(owner)
            .ok_or_else(|| StoreError::not_found(owner))?;
        if transition(&mut entry, SessionStatus::Revoked) {
            tracing::warn!(owner = %owner, session = %entry.session_id, "session revoked");
        }
        Ok(entry.status)
    }

    async fn expire(&self, owner: &OwnerId) -> Result<SessionStatus> {
        let mut entry = self
            .sessions
            .get_mut(owner)
            .ok_or_else(|| StoreError::not_found(owner))?;
        if transition(&mut entry, SessionStatus::Expired) {
            tracing::info!(owner = %owner, session = %entry.session_id, "session expired");
        }
        Ok(entry.status)
    }

    async fn list(&self) -> Result<Vec<AuthorizationSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockeasy_types::{Amount, Currency, SessionBuilder};

    fn session(owner: &str) -> AuthorizationSession {
        SessionBuilder::new(OwnerId::from(owner), Currency::from("INR"))
            .allow("SUP1")
            .per_transaction_limit(200)
            .daily_limit(2000)
            .monthly_limit(20000)
            .build()
    }

    #[tokio::test]
    async fn test_missing_owner_is_not_found() {
        let store = InMemoryPolicyStore::new();
        let err = store.get(&OwnerId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_commit_is_compare_and_swap() {
        let store = InMemoryPolicyStore::new();
        let stored = store.put(session("shop-1")).await.unwrap();
        let owner = stored.owner_id.clone();

        let mut counters = stored.counters;
        counters.spent_today = Amount::new(150);

        let first = store.commit(&owner, stored.version, counters).await.unwrap();
        assert_eq!(first, CommitResult::Committed { version: stored.version + 1 });

        let stale = store.commit(&owner, stored.version, counters).await.unwrap();
        assert_eq!(
            stale,
            CommitResult::Conflict {
                current_version: stored.version + 1
            }
        );

        let loaded = store.get(&owner).await.unwrap();
        assert_eq!(loaded.counters.spent_today, Amount::new(150));
    }

    #[tokio::test]
    async fn test_revoke_is_terminal_and_idempotent() {
        let store = InMemoryPolicyStore::new();
        let stored = store.put(session("shop-1")).await.unwrap();
        let owner = stored.owner_id.clone();

        assert_eq!(store.revoke(&owner).await.unwrap(), SessionStatus::Revoked);
        let version = store.get(&owner).await.unwrap().version;
        assert_eq!(store.revoke(&owner).await.unwrap(), SessionStatus::Revoked);
        assert_eq!(store.expire(&owner).await.unwrap(), SessionStatus::Revoked);
        assert_eq!(store.get(&owner).await.unwrap().version, version);

        // Same session id cannot be brought back
        let mut revived = stored.clone();
        revived.status = SessionStatus::Active;
        assert!(matches!(
            store.put(revived).await,
            Err(StoreError::SessionTerminal { .. })
        ));

        // A fresh delegation can
        let replacement = store.put(session("shop-1")).await.unwrap();
        assert_eq!(replacement.status, SessionStatus::Active);
        assert!(replacement.version > version);
    }

    #[tokio::test]
    async fn test_revoke_bumps_version_so_stale_commits_conflict() {
        let store = InMemoryPolicyStore::new();
        let stored = store.put(session("shop-1")).await.unwrap();
        store.revoke(&stored.owner_id).await.unwrap();
        let result = store
            .commit(&stored.owner_id, stored.version, stored.counters)
            .await
            .unwrap();
        assert!(matches!(result, CommitResult::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_put_rejects_invalid_session() {
        let store = InMemoryPolicyStore::new();
        let mut bad = session("shop-1");
        bad.per_transaction_limit = Amount::ZERO;
        assert!(matches!(store.put(bad).await, Err(StoreError::Invalid(_))));
        assert!(store.is_empty());
    }
}
