//! In-memory session cache with LRU eviction and dirty tracking.
//!
//! The cache is the single place where residency, dirty flags, and LRU
//! order live, so the session manager can update all three under one lock.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::models::Session;

/// A cached session plus its unsaved-changes flag.
#[derive(Debug, Clone)]
pub struct CachedSession {
    pub session: Session,
    pub dirty: bool,
}

/// Bounded session cache. Eviction returns the displaced entry so the
/// caller can flush it if dirty.
#[derive(Debug)]
pub struct SessionCache {
    entries: LruCache<String, CachedSession>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Insert a session, promoting it to most-recently-used.
    ///
    /// Returns the entry evicted to make room, if any. Re-inserting an
    /// existing id replaces it in place and evicts nothing.
    pub fn insert(&mut self, session: Session, dirty: bool) -> Option<(String, CachedSession)> {
        let id = session.id.clone();
        match self.entries.push(id.clone(), CachedSession { session, dirty }) {
            Some((evicted_id, entry)) if evicted_id != id => Some((evicted_id, entry)),
            _ => None,
        }
    }

    /// Fetch a clone of a cached session, promoting it to MRU.
    pub fn get(&mut self, id: &str) -> Option<Session> {
        self.entries.get(id).map(|e| e.session.clone())
    }

    /// Read a cached session without touching LRU order.
    pub fn peek(&self, id: &str) -> Option<&Session> {
        self.entries.peek(id).map(|e| &e.session)
    }

    /// Mutate a cached session in place, promoting it and marking it dirty.
    pub fn with_mut<R>(&mut self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let entry = self.entries.get_mut(id)?;
        let result = f(&mut entry.session);
        entry.dirty = true;
        Some(result)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<CachedSession> {
        self.entries.pop(id)
    }

    /// Clear the dirty flag after a successful save.
    pub fn mark_clean(&mut self, id: &str) {
        if let Some(entry) = self.entries.peek_mut(id) {
            entry.dirty = false;
        }
    }

    /// Clones of all dirty sessions, without disturbing LRU order.
    pub fn dirty_sessions(&self) -> Vec<Session> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(_, e)| e.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
