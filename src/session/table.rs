//! Session table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{SessionId, SessionRecord};
use crate::error::MuxError;
use crate::Result;

/// Thread-safe mapping from session ID to live record.
///
/// The lock is held only for the map operation itself, never while a
/// handler runs, so presence checks stay cheap however busy a session is.
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, Arc<SessionRecord>>>,
}

impl SessionTable {
    /// Create a new empty session table.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a record under its own ID.
    ///
    /// Fails if a record with the same ID is already present.
    pub fn insert(&self, record: Arc<SessionRecord>) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MuxError::LockPoisoned)?;

        let id = record.id();
        if sessions.contains_key(&id) {
            return Err(MuxError::SessionExists(id.to_string()));
        }

        sessions.insert(id, record);
        Ok(())
    }

    /// Get the record with the given ID.
    pub fn lookup(&self, id: &SessionId) -> Result<Option<Arc<SessionRecord>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MuxError::LockPoisoned)?;
        Ok(sessions.get(id).cloned())
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &SessionId) -> Result<bool> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MuxError::LockPoisoned)?;
        Ok(sessions.contains_key(id))
    }

    /// Remove a record from the table.
    ///
    /// Returns the removed record, or None if it didn't exist. Removing an
    /// absent ID is a no-op.
    pub fn remove(&self, id: &SessionId) -> Result<Option<Arc<SessionRecord>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MuxError::LockPoisoned)?;
        Ok(sessions.remove(id))
    }

    /// Get the number of sessions in the table.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// List all session IDs.
    pub fn list_ids(&self) -> Result<Vec<SessionId>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MuxError::LockPoisoned)?;
        Ok(sessions.keys().copied().collect())
    }

    /// Snapshot of all live records.
    pub fn records(&self) -> Result<Vec<Arc<SessionRecord>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| MuxError::LockPoisoned)?;
        Ok(sessions.values().cloned().collect())
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
