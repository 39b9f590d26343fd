//! In-flight explanation subscriptions, at most one per session identity.

use crate::stream::CancelHandle;
use alloy_primitives::B256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of a subscription: the caller's session, plus the transaction
/// hash for transaction explanations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub session_id: String,
    pub transaction: Option<B256>,
}

impl SessionKey {
    pub fn contract(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            transaction: None,
        }
    }

    pub fn transaction(session_id: impl Into<String>, hash: B256) -> Self {
        Self {
            session_id: session_id.into(),
            transaction: Some(hash),
        }
    }
}

#[derive(Debug)]
struct ActiveSession {
    generation: u64,
    cancel: CancelHandle,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<SessionKey, ActiveSession>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `key` for a new subscription. Returns `None` when the key is
    /// already active.
    ///
    /// The membership check and the insert happen under one lock, so two
    /// concurrent claims for the same key cannot both succeed. The claim is
    /// released when the returned guard drops.
    pub fn try_register(&self, key: SessionKey, cancel: CancelHandle) -> Option<SessionGuard> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&key) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(key.clone(), ActiveSession { generation, cancel });

        Some(SessionGuard {
            registry: self.clone(),
            key,
            generation,
        })
    }

    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.sessions().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Cancels the in-flight generation for `key`, if any. The entry itself
    /// goes away when the subscription task ends.
    pub fn cancel(&self, key: &SessionKey) -> bool {
        match self.sessions().get(key) {
            Some(session) => {
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every subscription belonging to `session_id`.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let sessions = self.sessions();
        let mut cancelled = 0;
        for (key, session) in sessions.iter() {
            if key.session_id == session_id {
                session.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        for session in self.sessions().values() {
            session.cancel.cancel();
        }
    }

    fn release(&self, key: &SessionKey, generation: u64) {
        let mut sessions = self.sessions();
        if sessions
            .get(key)
            .is_some_and(|session| session.generation == generation)
        {
            sessions.remove(key);
        }
    }
}

/// Holds a claim in a [`SessionRegistry`] until dropped.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    key: SessionKey,
    generation: u64,
}

impl SessionGuard {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.generation);
    }
}
