//! Durable policy store on sled
//!
//! Sessions are stored as JSON under their owner id in the `sessions`
//! tree. Every write is a read-decode-modify-CAS loop on the raw bytes, so
//! the version check and the write are atomic per owner even across
//! concurrent writers.

use crate::store::{prepare_put, transition, CommitResult, PolicyStore, Result, StoreError};
use async_trait::async_trait;
use std::path::Path;
use stockeasy_types::{AuthorizationSession, OwnerId, SessionStatus, SpendCounters};

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Sled-backed [`PolicyStore`]
#[derive(Debug, Clone)]
pub struct SledPolicyStore {
    db: sled::Db,
    sessions: sled::Tree,
}

impl SledPolicyStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Store that is deleted when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let sessions = db.open_tree("sessions")?;
        Ok(Self { db, sessions })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Read-modify-write one owner's record
    ///
    /// `apply` sees the decoded session (if any) and returns the record to
    /// write (or `None` to leave it) plus the value to hand back. It may run
    /// more than once when another writer gets in between.
    fn modify<T>(
        &self,
        owner: &OwnerId,
        mut apply: impl FnMut(Option<AuthorizationSession>) -> Result<(Option<AuthorizationSession>, T)>,
    ) -> Result<T> {
        loop {
            let current = self.sessions.get(owner.as_str())?;
            let decoded = current
                .as_ref()
                .map(|raw| serde_json::from_slice::<AuthorizationSession>(raw))
                .transpose()?;
            let (next, value) = apply(decoded)?;
            let Some(next) = next else {
                return Ok(value);
            };
            let encoded = serde_json::to_vec(&next)?;
            match self
                .sessions
                .compare_and_swap(owner.as_str(), current, Some(encoded))?
            {
                Ok(()) => return Ok(value),
                Err(_) => {
                    tracing::debug!(owner = %owner, "concurrent write, retrying");
                }
            }
        }
    }

    fn change_status(&self, owner: &OwnerId, target: SessionStatus) -> Result<SessionStatus> {
        self.modify(owner, |current| {
            let mut session = current.ok_or_else(|| StoreError::not_found(owner))?;
            if transition(&mut session, target) {
                let status = session.status;
                Ok((Some(session), status))
            } else {
                Ok((None, session.status))
            }
        })
    }
}

#[async_trait]
impl PolicyStore for SledPolicyStore {
    async fn get(&self, owner: &OwnerId) -> Result<AuthorizationSession> {
        let raw = self
            .sessions
            .get(owner.as_str())?
            .ok_or_else(|| StoreError::not_found(owner))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn put(&self, session: AuthorizationSession) -> Result<AuthorizationSession> {
        let owner = session.owner_id.clone();
        let stored = self.modify(&owner, |current| {
            let stored = prepare_put(current.as_ref(), session.clone())?;
            Ok((Some(stored.clone()), stored))
        })?;
        self.flush().await?;
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
        let result = self.modify(owner, |current| {
            let mut session = current.ok_or_else(|| StoreError::not_found(owner))?;
            if session.version != expected_version {
                let conflict = CommitResult::Conflict {
                    current_version: session.version,
                };
                return Ok((None, conflict));
            }
            session.counters = counters;
            session.version += 1;
            let version = session.version;
            Ok((Some(session), CommitResult::Committed { version }))
        })?;
        if matches!(result, CommitResult::Committed { .. }) {
            self.flush().await?;
        }
        Ok(result)
    }

    async fn revoke(&self, owner: &OwnerId) -> Result<SessionStatus> {
        let status = self.change_status(owner, SessionStatus::Revoked)?;
        self.flush().await?;
        tracing::warn!(owner = %owner, status = %status, "revoke requested");
        Ok(status)
    }

    async fn expire(&self, owner: &OwnerId) -> Result<SessionStatus> {
        let status = self.change_status(owner, SessionStatus::Expired)?;
        self.flush().await?;
        Ok(status)
    }

    async fn list(&self) -> Result<Vec<AuthorizationSession>> {
        let mut sessions = Vec::with_capacity(self.sessions.len());
        for item in self.sessions.iter() {
            let (_, raw) = item?;
            sessions.push(serde_json::from_slice(&raw)?);
        }
        Ok(sessions)
    }
}
