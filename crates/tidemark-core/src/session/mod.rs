//! Session lifecycle: creation, persistence, recovery, and boundaries.
//!
//! The manager owns resident sessions through an LRU cache and persists
//! them as one JSON file per session with a `.bak` sibling. A lightweight
//! on-disk index makes listing possible without opening session files.
//!
//! Failure semantics: saves report `false` and log (callers decide whether
//! to retry); loads degrade through backup to a synthesized recovery
//! session - corrupted history must never take the conversation down.

pub mod autosave;
pub mod cache;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use tidemark_storage::{SessionFileStore, index};

use crate::config::SessionConfig;
use crate::models::{Message, MessageCategory, Role, Session, SessionIndexEntry};

use cache::SessionCache;

pub use autosave::AutosaveHandle;

const INDEX_FILE: &str = "session_index.json";
const TITLE_MAX_CHARS: usize = 64;

/// Cache, index, and live-session pointer. Kept behind one mutex so dirty
/// flags and LRU order always change together.
struct ManagerState {
    cache: SessionCache,
    index: BTreeMap<String, SessionIndexEntry>,
    current: Option<String>,
}

/// Manages conversation sessions: creation, loading with recovery,
/// transaction-safe saving, boundaries, and continuation splitting.
pub struct SessionManager {
    files: SessionFileStore,
    index_path: PathBuf,
    max_messages_per_session: usize,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    /// Open the manager over `dir`, loading the session index.
    pub fn new(dir: &Path, config: &SessionConfig) -> Result<Self> {
        let files = SessionFileStore::new(dir)
            .with_context(|| format!("opening session store at {}", dir.display()))?;
        let index_path = dir.join(INDEX_FILE);

        let index = match index::read_index(&index_path) {
            Ok(index) => index,
            Err(e) => {
                // A lost index only costs listing metadata; sessions
                // themselves are intact and re-register on next save.
                warn!(error = %e, "session index unreadable, starting empty");
                BTreeMap::new()
            }
        };

        info!(sessions = index.len(), "session manager initialized");

        Ok(Self {
            files,
            index_path,
            max_messages_per_session: config.max_messages_per_session,
            state: Mutex::new(ManagerState {
                cache: SessionCache::new(config.max_cached_sessions),
                index,
                current: None,
            }),
        })
    }

    /// Create a new empty session, cache it dirty, and make it current.
    pub fn create_session(&self) -> Session {
        let session = Session::new();
        let mut state = self.state.lock();
        self.cache_insert(&mut state, session.clone(), true);
        state.current = Some(session.id.clone());
        debug!(session_id = %session.id, "created session");
        session
    }

    /// Load a session by id with error recovery.
    ///
    /// Cache hits promote the entry. A failed primary read falls back to
    /// the `.bak` file (restoring it over the primary on success). When
    /// both fail a labeled recovery session is synthesized - this method
    /// always yields a usable session.
    pub fn load_session(&self, id: &str) -> Session {
        let mut state = self.state.lock();

        if let Some(session) = state.cache.get(id) {
            return session;
        }

        match self.read_validated(id) {
            Ok(session) => {
                debug!(session_id = %id, "loaded session from primary file");
                self.cache_insert(&mut state, session.clone(), false);
                return session;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "primary session file unusable");
            }
        }

        match self.read_validated_backup(id) {
            Ok(session) => {
                if let Err(e) = self.files.restore_backup(id) {
                    warn!(session_id = %id, error = %e, "could not restore backup over primary");
                }
                warn!(session_id = %id, "restored session from backup");
                self.cache_insert(&mut state, session.clone(), false);
                return session;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "backup session file unusable");
            }
        }

        let recovery = Self::build_recovery_session(id);
        info!(
            session_id = %recovery.id,
            recovered_from = %id,
            "created recovery session for unloadable session"
        );
        self.cache_insert(&mut state, recovery.clone(), true);
        recovery
    }

    /// Read a session without mutating the cache or synthesizing recovery
    /// state. Used by checkpoint flattening, which must not disturb the
    /// main line's cache.
    pub fn peek_session(&self, id: &str) -> Option<Session> {
        {
            let state = self.state.lock();
            if let Some(session) = state.cache.peek(id) {
                return Some(session.clone());
            }
        }
        self.read_validated(id)
            .or_else(|_| self.read_validated_backup(id))
            .ok()
    }

    /// Save a session with transaction safety and refresh its index entry.
    ///
    /// Returns false on failure; the error is logged and the session stays
    /// dirty in the cache so a later flush retries it. The dirty flag only
    /// clears when the saved snapshot still matches the cached state, so a
    /// concurrent append is never lost.
    pub fn save_session(&self, session: &Session) -> bool {
        let mut state = self.state.lock();
        if !self.save_session_unlocked(session, &mut state) {
            return false;
        }

        let snapshot_is_current = state.cache.peek(&session.id).is_some_and(|cached| {
            cached.last_active == session.last_active
                && cached.message_count() == session.message_count()
        });
        if snapshot_is_current {
            state.cache.mark_clean(&session.id);
        }
        debug!(session_id = %session.id, "saved session");
        true
    }

    /// Append a message to a cached session, marking it dirty.
    ///
    /// Returns false when the session is not resident; load it first.
    pub fn append_message(&self, session_id: &str, message: Message) -> bool {
        let mut state = self.state.lock();
        state
            .cache
            .with_mut(session_id, |session| session.add_message(message))
            .is_some()
    }

    /// Replace a resident session wholesale (post-trim or post-rollback
    /// state) and mark it dirty.
    pub fn replace_session(&self, session: Session) {
        let mut state = self.state.lock();
        self.cache_insert(&mut state, session, true);
    }

    /// Id of the live session, if one is set.
    pub fn current_session_id(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    /// Clone of the live session, if resident.
    pub fn current_session(&self) -> Option<Session> {
        let mut state = self.state.lock();
        let id = state.current.clone()?;
        state.cache.get(&id)
    }

    /// Make `id` the live session.
    pub fn set_current(&self, id: &str) {
        self.state.lock().current = Some(id.to_string());
    }

    /// True once a session has reached the configured message cap.
    pub fn check_session_boundary(&self, session: &Session) -> bool {
        session.message_count() >= self.max_messages_per_session
    }

    /// Create a continuation session for a source that hit its boundary.
    ///
    /// System and Context messages are carried over verbatim (token counts
    /// preserved); Dialog and SystemOutput history is deliberately dropped.
    /// Exactly one transition marker is added, the two sessions are linked
    /// bidirectionally, and both are saved.
    pub fn create_continuation_session(&self, source_id: &str) -> Result<Session> {
        let mut source = self.load_session(source_id);

        let mut continuation = Session::new();
        continuation.metadata.continued_from = Some(source.id.clone());
        continuation.metadata.continuation_index = Some(self.continuation_index(&source.id));

        for category in [MessageCategory::System, MessageCategory::Context] {
            for msg in source.messages_by_category(category) {
                let mut copy = Message::new(msg.role, msg.content.clone(), msg.category)
                    .with_tokens(msg.tokens);
                copy.metadata = msg.metadata.clone();
                continuation.add_message(copy);
            }
        }

        let marker = Message::system(format!("Continuing from session {}", source.id))
            .with_metadata("type", "session_transition")
            .with_metadata("previous_session", source.id.clone());
        continuation.add_message(marker);

        source.metadata.continued_to = Some(continuation.id.clone());

        {
            let mut state = self.state.lock();
            self.cache_insert(&mut state, source.clone(), true);
            self.cache_insert(&mut state, continuation.clone(), true);
            state.current = Some(continuation.id.clone());
        }

        self.save_session(&source);
        self.save_session(&continuation);

        info!(
            continuation_id = %continuation.id,
            source_id = %source.id,
            "created continuation session"
        );
        Ok(continuation)
    }

    /// List sessions from the index, newest `last_active` first.
    /// Never opens a session file.
    pub fn list_sessions(&self, limit: usize, offset: usize) -> Vec<(String, SessionIndexEntry)> {
        let state = self.state.lock();
        let mut entries: Vec<(String, SessionIndexEntry)> = state
            .index
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.last_active.cmp(&a.1.last_active));
        entries.into_iter().skip(offset).take(limit).collect()
    }

    /// Parent in the continuation chain, from the index (or cache for
    /// sessions that have never been saved).
    pub fn lineage_parent(&self, id: &str) -> Option<String> {
        let state = self.state.lock();
        if let Some(entry) = state.index.get(id) {
            return entry.continued_from.clone();
        }
        state
            .cache
            .peek(id)
            .and_then(|s| s.metadata.continued_from.clone())
    }

    /// Delete a session: cache entry, index entry, and all files.
    pub fn delete_session(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        state.cache.remove(id);
        if state.current.as_deref() == Some(id) {
            state.current = None;
        }
        state.index.remove(id);
        if let Err(e) = index::write_index(&self.index_path, &state.index) {
            warn!(session_id = %id, error = %e, "failed to write session index");
        }
        drop(state);

        match self.files.delete(id) {
            Ok(_) => {
                info!(session_id = %id, "deleted session");
                true
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to delete session files");
                false
            }
        }
    }

    /// Flush every dirty cached session to disk. Returns how many saved.
    ///
    /// Runs under the state lock: the snapshots written are exactly the
    /// cached sessions whose flags are cleared.
    pub fn flush_dirty(&self) -> usize {
        let mut state = self.state.lock();
        let dirty = state.cache.dirty_sessions();
        let mut saved = 0;
        for session in dirty {
            if self.save_session_unlocked(&session, &mut state) {
                state.cache.mark_clean(&session.id);
                saved += 1;
            }
        }
        if saved > 0 {
            debug!(saved, "flushed dirty sessions");
        }
        saved
    }

    /// Number of sessions known to the index.
    pub fn session_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Insert into the cache, flushing any evicted dirty entry first.
    fn cache_insert(&self, state: &mut ManagerState, session: Session, dirty: bool) {
        if let Some((evicted_id, evicted)) = state.cache.insert(session, dirty)
            && evicted.dirty
        {
            debug!(session_id = %evicted_id, "evicting dirty session, flushing");
            if !self.save_session_unlocked(&evicted.session, state) {
                error!(session_id = %evicted_id, "failed to flush evicted session");
            }
        }
    }

    /// Save path for use while the state lock is already held.
    fn save_session_unlocked(&self, session: &Session, state: &mut ManagerState) -> bool {
        let bytes = match serde_json::to_vec_pretty(session) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "failed to serialize session");
                return false;
            }
        };
        if let Err(e) = self.files.save(&session.id, &bytes) {
            error!(session_id = %session.id, error = %e, "failed to save session");
            return false;
        }
        let previous_title = state
            .index
            .get(&session.id)
            .and_then(|entry| entry.title.clone());
        let mut entry = SessionIndexEntry::from_session(session, previous_title);
        if entry.title.is_none() {
            entry.title = derive_title(session);
        }
        state.index.insert(session.id.clone(), entry);
        if let Err(e) = index::write_index(&self.index_path, &state.index) {
            warn!(session_id = %session.id, error = %e, "failed to write session index");
        }
        true
    }

    fn read_validated(&self, id: &str) -> Result<Session> {
        let bytes = self.files.load(id)?;
        let session: Session = serde_json::from_slice(&bytes)?;
        if !session.validate() {
            anyhow::bail!("session {id} failed validation");
        }
        Ok(session)
    }

    fn read_validated_backup(&self, id: &str) -> Result<Session> {
        let bytes = self.files.load_backup(id)?;
        let session: Session = serde_json::from_slice(&bytes)?;
        if !session.validate() {
            anyhow::bail!("session {id} backup failed validation");
        }
        Ok(session)
    }

    fn build_recovery_session(failed_id: &str) -> Session {
        let mut session = Session::new();
        session.id = format!("recovery-{}", uuid::Uuid::new_v4());
        session.metadata.recovered_from = Some(failed_id.to_string());

        let notice = Message::new(
            Role::System,
            format!(
                "This is a recovery session. The original session '{failed_id}' \
                 could not be loaded due to file corruption or other errors."
            ),
            MessageCategory::System,
        )
        .with_metadata("type", "recovery_notice");
        session.add_message(notice);
        session
    }

    /// 1-based index for the next continuation of `source_id`.
    fn continuation_index(&self, source_id: &str) -> u32 {
        let state = self.state.lock();
        let existing = state
            .index
            .values()
            .filter(|entry| entry.continued_from.as_deref() == Some(source_id))
            .count() as u32;
        existing + 1
    }
}

/// Title for listings: the first user dialog message, truncated.
fn derive_title(session: &Session) -> Option<String> {
    session
        .messages
        .iter()
        .find(|m| m.category == MessageCategory::Dialog && m.role == Role::User)
        .map(|m| {
            let text = m.content.text_lossy();
            text.chars().take(TITLE_MAX_CHARS).collect()
        })
}
