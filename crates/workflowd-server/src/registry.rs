// ABOUTME: Connection registry mapping connection ids to their command channels.
// ABOUTME: One instance per dispatcher; the lock is only held for map operations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::channel::CommandSender;

/// Thread-safe map from connection id to command channel.
///
/// Safe to call from any number of connection handlers and dispatch callers
/// at once. The internal lock is never held across an await point, so a slow
/// connection cannot block lookups for another.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, CommandSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, CommandSender>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert unconditionally; ids are unique so last-writer-wins is harmless.
    pub fn register(&self, connection_id: impl Into<String>, sender: CommandSender) {
        self.map().insert(connection_id.into(), sender);
    }

    /// Remove if present. Returns the removed channel.
    pub fn unregister(&self, connection_id: &str) -> Option<CommandSender> {
        self.map().remove(connection_id)
    }

    pub fn lookup(&self, connection_id: &str) -> Option<CommandSender> {
        self.map().get(connection_id).cloned()
    }

    /// Snapshot of registered ids, for tooling.
    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
