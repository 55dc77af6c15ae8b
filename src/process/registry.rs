//! Registry of live sessions, keyed by session identifier.

use std::sync::Arc;

use dashmap::DashMap;

use super::ProcessSession;

/// Shared map of session id to [`ProcessSession`] handle.
///
/// Cloning the registry clones the `Arc`, so every gateway task sees the
/// same set of sessions. Lookups clone the handle out of the map; no
/// shard lock is ever held across an await point.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<DashMap<String, ProcessSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its own id.
    pub fn insert(&self, session: ProcessSession) {
        self.sessions.insert(session.id().to_string(), session);
    }

    /// Looks up a session, returning a cloned handle.
    pub fn get(&self, id: &str) -> Option<ProcessSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Removes a session, returning its handle when it was present.
    /// Removal and lookup race atomically; a concurrent `get` sees the
    /// entry either fully present or fully gone.
    pub fn remove(&self, id: &str) -> Option<ProcessSession> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every registered session and empties the registry. Used on
    /// gateway shutdown.
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
        self.sessions.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
