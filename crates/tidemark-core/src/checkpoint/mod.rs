//! Checkpointing: point-in-time snapshots with retention, rollback, and
//! branching.
//!
//! Creation is fire-and-forget: `create_checkpoint` enqueues an immutable
//! session snapshot and returns the id immediately; a single worker
//! persists requests strictly in arrival order. A second, independent
//! worker applies the retention policy. See `worker` for the loops.

pub mod retention;
pub mod worker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use tidemark_storage::{CheckpointFileStore, index};

use crate::config::CheckpointConfig;
use crate::models::{
    CheckpointMetadata, CheckpointRecord, CheckpointType, Message, MessageCategory, Session,
};
use crate::session::SessionManager;

pub use worker::CheckpointWorkers;

const INDEX_FILE: &str = "checkpoint_index.json";

/// System messages matching these markers are still checkpoint-eligible.
const IMPORTANT_SYSTEM_MARKERS: [&str; 3] =
    ["action executed", "session transition", "iteration marker"];

/// Work accepted by the creation worker.
pub(crate) enum CreateJob {
    Write(Box<(Session, CheckpointMetadata)>),
    /// Barrier: acked once every earlier job has been processed.
    Flush(oneshot::Sender<()>),
}

/// Work accepted by the cleanup worker.
pub(crate) enum CleanupJob {
    Run,
    Flush(oneshot::Sender<()>),
}

/// Manages conversation checkpoints with background worker persistence.
pub struct CheckpointManager {
    files: CheckpointFileStore,
    index_path: PathBuf,
    sessions: Arc<SessionManager>,
    config: CheckpointConfig,
    index: Mutex<BTreeMap<String, CheckpointMetadata>>,
    message_counter: AtomicU64,
    create_tx: mpsc::UnboundedSender<CreateJob>,
    cleanup_tx: mpsc::UnboundedSender<CleanupJob>,
    pub(crate) create_rx: Mutex<Option<mpsc::UnboundedReceiver<CreateJob>>>,
    pub(crate) cleanup_rx: Mutex<Option<mpsc::UnboundedReceiver<CleanupJob>>>,
}

impl CheckpointManager {
    /// Open the manager over `dir`, loading the checkpoint index.
    pub fn new(dir: &Path, sessions: Arc<SessionManager>, config: CheckpointConfig) -> Result<Self> {
        let files = CheckpointFileStore::new(dir)
            .with_context(|| format!("opening checkpoint store at {}", dir.display()))?;
        let index_path = dir.join(INDEX_FILE);

        let index = match index::read_index(&index_path) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "checkpoint index unreadable, starting empty");
                BTreeMap::new()
            }
        };

        let mut config = config;
        if config.frequency == 0 {
            warn!("checkpoint frequency 0 is invalid, clamping to 1");
            config.frequency = 1;
        }

        info!(checkpoints = index.len(), "checkpoint manager initialized");

        let (create_tx, create_rx) = mpsc::unbounded_channel();
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();

        Ok(Self {
            files,
            index_path,
            sessions,
            config,
            index: Mutex::new(index),
            message_counter: AtomicU64::new(0),
            create_tx,
            cleanup_tx,
            create_rx: Mutex::new(Some(create_rx)),
            cleanup_rx: Mutex::new(Some(cleanup_rx)),
        })
    }

    /// Decide whether this message should trigger an auto checkpoint.
    ///
    /// Most system-category messages are skipped; only those matching the
    /// important-marker list count. Eligible messages then pass through the
    /// frequency gate (every Nth).
    pub fn should_checkpoint(&self, message: &Message) -> bool {
        if !self.config.enabled {
            return false;
        }

        if message.category == MessageCategory::System {
            let text = message.content.text_lossy().to_lowercase();
            if !IMPORTANT_SYSTEM_MARKERS
                .iter()
                .any(|marker| text.contains(marker))
            {
                return false;
            }
        }

        let count = self.message_counter.fetch_add(1, Ordering::SeqCst) + 1;
        count % self.config.frequency == 0
    }

    /// Enqueue a checkpoint of `session` and return its id immediately.
    ///
    /// The session crosses to the worker as an owned snapshot; the caller's
    /// copy is never touched. Returns `None` when checkpointing is disabled
    /// or the workers have shut down.
    pub fn create_checkpoint(
        &self,
        session: &Session,
        message: &Message,
        kind: CheckpointType,
        name: Option<String>,
        description: Option<String>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        let metadata = CheckpointMetadata::new(kind, session, message.id.clone())
            .with_name(name)
            .with_description(description);
        let id = metadata.id.clone();

        let job = CreateJob::Write(Box::new((session.clone(), metadata)));
        if self.create_tx.send(job).is_err() {
            warn!(checkpoint_id = %id, "checkpoint queue closed, dropping request");
            return None;
        }

        debug!(checkpoint_id = %id, kind = ?kind, "enqueued checkpoint");
        Some(id)
    }

    /// Roll the live session back to a checkpoint.
    ///
    /// The current live session is safety-checkpointed first (kind
    /// `Rollback`), then replaced and saved. Returns false on unknown id or
    /// unreadable checkpoint file.
    pub fn rollback_to_checkpoint(&self, checkpoint_id: &str) -> bool {
        if !self.index.lock().contains_key(checkpoint_id) {
            warn!(checkpoint_id = %checkpoint_id, "rollback target not in index");
            return false;
        }

        let record = match self.load_record(checkpoint_id) {
            Ok(record) => record,
            Err(e) => {
                error!(checkpoint_id = %checkpoint_id, error = %e, "failed to load checkpoint");
                return false;
            }
        };

        // Capture the pre-rollback state before anything is replaced.
        if let Some(current) = self.sessions.current_session()
            && let Some(last) = current.messages.last().cloned()
        {
            let label = format!("Before rollback to {}", short_id(checkpoint_id));
            self.create_checkpoint(&current, &last, CheckpointType::Rollback, Some(label), None);
        }

        let session = record.session;
        self.sessions.replace_session(session.clone());
        self.sessions.set_current(&session.id);
        self.sessions.save_session(&session);

        info!(checkpoint_id = %checkpoint_id, session_id = %session.id, "rolled back to checkpoint");
        true
    }

    /// Branch a new session off a checkpoint.
    ///
    /// The checkpointed session is flattened across its lineage, tagged
    /// with the branch origin, persisted as a `Branch` checkpoint, and made
    /// the live session. Returns the branch checkpoint id, or `None` on
    /// failure.
    pub fn branch_from_checkpoint(
        &self,
        checkpoint_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Option<String> {
        let branch_point = {
            let index = self.index.lock();
            match index.get(checkpoint_id) {
                Some(metadata) => metadata.message_id.clone(),
                None => {
                    warn!(checkpoint_id = %checkpoint_id, "branch source not in index");
                    return None;
                }
            }
        };

        let record = match self.load_record(checkpoint_id) {
            Ok(record) => record,
            Err(e) => {
                error!(checkpoint_id = %checkpoint_id, error = %e, "failed to load checkpoint");
                return None;
            }
        };

        let mut branch = self.build_flat_snapshot(&record.session);
        branch.metadata.branched_from = Some(checkpoint_id.to_string());
        branch.metadata.branch_point = Some(branch_point);

        let last = branch.messages.last().cloned()?;
        let name = name.or_else(|| Some(format!("Branch from {}", short_id(checkpoint_id))));
        let branch_checkpoint_id =
            self.create_checkpoint(&branch, &last, CheckpointType::Branch, name, description)?;

        self.sessions.replace_session(branch.clone());
        self.sessions.set_current(&branch.id);
        self.sessions.save_session(&branch);

        info!(
            branch_checkpoint = %branch_checkpoint_id,
            source_checkpoint = %checkpoint_id,
            "created branch from checkpoint"
        );
        Some(branch_checkpoint_id)
    }

    /// List checkpoints from the index, newest first. No file I/O.
    pub fn list_checkpoints(
        &self,
        session_id: Option<&str>,
        kind: Option<CheckpointType>,
        limit: usize,
    ) -> Vec<CheckpointMetadata> {
        let index = self.index.lock();
        let mut entries: Vec<CheckpointMetadata> = index
            .values()
            .filter(|m| session_id.is_none_or(|id| m.session_id == id))
            .filter(|m| kind.is_none_or(|k| m.kind == k))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }

    /// Request a retention pass on the cleanup worker.
    pub fn cleanup_old_checkpoints(&self) {
        if self.cleanup_tx.send(CleanupJob::Run).is_err() {
            warn!("cleanup queue closed, dropping request");
        }
    }

    /// Walk `continued_from` links back to the root. Returns the chain
    /// root-first, ending at `session_id`.
    pub fn collect_lineage(&self, session_id: &str) -> Vec<String> {
        let mut chain = vec![session_id.to_string()];
        let mut current = session_id.to_string();

        while let Some(parent) = self.sessions.lineage_parent(&current) {
            // Corrupted indexes could link in a loop; stop rather than spin.
            if chain.contains(&parent) {
                warn!(session_id = %parent, "lineage cycle detected, truncating chain");
                break;
            }
            chain.insert(0, parent.clone());
            current = parent;
        }

        chain
    }

    /// Await completion of everything enqueued so far on both workers.
    pub async fn flush(&self) {
        for ack in [
            Self::barrier(&self.create_tx, CreateJob::Flush),
            Self::barrier(&self.cleanup_tx, CleanupJob::Flush),
        ] {
            if let Some(rx) = ack {
                let _ = rx.await;
            }
        }
    }

    fn barrier<J>(
        tx: &mpsc::UnboundedSender<J>,
        make: impl FnOnce(oneshot::Sender<()>) -> J,
    ) -> Option<oneshot::Receiver<()>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(make(ack_tx)).ok()?;
        Some(ack_rx)
    }

    /// Build a flattened snapshot of the full lineage behind `tail`.
    ///
    /// Messages from every session in the chain are concatenated in
    /// chronological (root-to-tip) order, then system messages are deduped
    /// so only the newest of each metadata `type` survives. Untyped system
    /// messages all share one bucket and may collapse together; that
    /// mirrors the historical behavior.
    pub(crate) fn build_flat_snapshot(&self, tail: &Session) -> Session {
        let lineage = self.collect_lineage(&tail.id);

        let mut merged = Session::new();
        merged.metadata.flattened = true;

        for session_id in &lineage {
            let source = if *session_id == tail.id {
                Some(tail.clone())
            } else {
                self.sessions.peek_session(session_id)
            };
            match source {
                Some(source) => {
                    for message in &source.messages {
                        merged.add_message(message.clone());
                    }
                }
                None => {
                    warn!(session_id = %session_id, "lineage session unavailable, skipping");
                }
            }
        }

        dedupe_system_messages(&mut merged);
        merged
    }

    /// Persist one enqueued checkpoint. Runs on the creation worker.
    pub(crate) fn write_checkpoint(&self, session: Session, metadata: CheckpointMetadata) {
        let snapshot = match metadata.kind {
            CheckpointType::Manual | CheckpointType::Branch => self.build_flat_snapshot(&session),
            CheckpointType::Auto | CheckpointType::Rollback => session,
        };

        let record = CheckpointRecord {
            metadata: metadata.clone(),
            session: snapshot,
        };

        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(checkpoint_id = %metadata.id, error = %e, "failed to serialize checkpoint");
                return;
            }
        };

        if let Err(e) = self.files.save(&metadata.id, &bytes) {
            error!(checkpoint_id = %metadata.id, error = %e, "failed to write checkpoint file");
            return;
        }

        let mut index = self.index.lock();
        index.insert(metadata.id.clone(), metadata.clone());
        if let Err(e) = index::write_index(&self.index_path, &index) {
            warn!(checkpoint_id = %metadata.id, error = %e, "failed to write checkpoint index");
        }

        debug!(checkpoint_id = %metadata.id, "checkpoint persisted");
    }

    /// One retention pass. Runs on the cleanup worker.
    pub(crate) fn perform_cleanup(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();

        let auto: Vec<(String, i64)> = {
            let index = self.index.lock();
            index
                .values()
                .filter(|m| m.kind == CheckpointType::Auto)
                .map(|m| (m.id.clone(), m.created_at))
                .collect()
        };

        let deletions = retention::plan_deletions(&auto, now, &self.config);
        if deletions.is_empty() {
            return 0;
        }

        let mut deleted = 0;
        for id in &deletions {
            if let Err(e) = self.files.delete(id) {
                error!(checkpoint_id = %id, error = %e, "failed to delete checkpoint file");
                continue;
            }
            deleted += 1;
        }

        let mut index = self.index.lock();
        for id in &deletions {
            index.remove(id);
        }
        if let Err(e) = index::write_index(&self.index_path, &index) {
            warn!(error = %e, "failed to write checkpoint index after cleanup");
        }

        info!(deleted, "checkpoint retention pass complete");
        deleted
    }

    fn load_record(&self, checkpoint_id: &str) -> Result<CheckpointRecord> {
        let bytes = self.files.load(checkpoint_id)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Keep only the newest system message of each metadata `type`; all other
/// categories pass through untouched. Order is preserved.
fn dedupe_system_messages(session: &mut Session) {
    let mut seen_types: Vec<String> = Vec::new();
    let mut keep: Vec<bool> = vec![false; session.messages.len()];

    for (i, message) in session.messages.iter().enumerate().rev() {
        if message.category != MessageCategory::System {
            keep[i] = true;
            continue;
        }
        let type_tag = message.type_tag().unwrap_or("generic").to_string();
        if !seen_types.contains(&type_tag) {
            seen_types.push(type_tag);
            keep[i] = true;
        }
    }

    let mut index = 0;
    session.messages.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(11)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::models::Message;
    use tempfile::tempdir;

    fn setup(dir: &Path, config: CheckpointConfig) -> (Arc<SessionManager>, CheckpointManager) {
        let sessions = Arc::new(
            SessionManager::new(
                &dir.join("conversations"),
                &SessionConfig::default(),
            )
            .unwrap(),
        );
        let manager =
            CheckpointManager::new(&dir.join("checkpoints"), sessions.clone(), config).unwrap();
        (sessions, manager)
    }

    #[test]
    fn test_should_checkpoint_frequency_gate() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig {
            frequency: 3,
            ..CheckpointConfig::default()
        };
        let (_, manager) = setup(dir.path(), config);

        let hits: Vec<bool> = (0..6)
            .map(|_| manager.should_checkpoint(&Message::user("turn")))
            .collect();
        assert_eq!(hits, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_should_checkpoint_skips_ordinary_system_messages() {
        let dir = tempdir().unwrap();
        let (_, manager) = setup(dir.path(), CheckpointConfig::default());

        assert!(!manager.should_checkpoint(&Message::system("routine notice")));
        // Important markers pass through to the frequency gate
        assert!(manager.should_checkpoint(&Message::system("Session transition complete")));
        // Skipped system messages must not advance the counter
        assert!(manager.should_checkpoint(&Message::user("turn")));
    }

    #[test]
    fn test_should_checkpoint_disabled() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig {
            enabled: false,
            ..CheckpointConfig::default()
        };
        let (_, manager) = setup(dir.path(), config);
        assert!(!manager.should_checkpoint(&Message::user("turn")));
    }

    #[test]
    fn test_create_checkpoint_returns_id_without_worker() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let session = sessions.create_session();
        let msg = Message::user("x");
        let id = manager
            .create_checkpoint(&session, &msg, CheckpointType::Auto, None, None)
            .unwrap();
        assert!(id.starts_with("cp-"));
        // Fire-and-forget: nothing persisted until a worker drains the queue
        assert!(manager.list_checkpoints(None, None, 10).is_empty());
    }

    #[test]
    fn test_write_checkpoint_persists_and_indexes() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let session = sessions.create_session();
        sessions.append_message(&session.id, Message::user("hello"));
        let session = sessions.current_session().unwrap();
        let last = session.messages.last().cloned().unwrap();

        let metadata =
            CheckpointMetadata::new(CheckpointType::Auto, &session, last.id.clone());
        let id = metadata.id.clone();
        manager.write_checkpoint(session.clone(), metadata);

        let listed = manager.list_checkpoints(Some(&session.id), None, 10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        let record = manager.load_record(&id).unwrap();
        assert_eq!(record.session.messages, session.messages);
    }

    #[test]
    fn test_rollback_unknown_id_is_false() {
        let dir = tempdir().unwrap();
        let (_, manager) = setup(dir.path(), CheckpointConfig::default());
        assert!(!manager.rollback_to_checkpoint("cp-nope"));
    }

    #[test]
    fn test_rollback_restores_checkpointed_session() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let session = sessions.create_session();
        sessions.append_message(&session.id, Message::user("good state"));
        let snapshot = sessions.current_session().unwrap();
        let last = snapshot.messages.last().cloned().unwrap();

        let metadata =
            CheckpointMetadata::new(CheckpointType::Manual, &snapshot, last.id.clone());
        let cp_id = metadata.id.clone();
        manager.write_checkpoint(snapshot.clone(), metadata);

        // Conversation moves on past the checkpoint
        sessions.append_message(&session.id, Message::user("regretted turn"));

        assert!(manager.rollback_to_checkpoint(&cp_id));
        let live = sessions.current_session().unwrap();
        assert_eq!(live.messages, snapshot.messages);

        // The pre-rollback state was safety-checkpointed (still enqueued)
        let drained = drain_create_queue(&manager);
        assert!(
            drained
                .iter()
                .any(|m| m.kind == CheckpointType::Rollback)
        );
    }

    #[test]
    fn test_branch_from_checkpoint_tags_lineage() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let session = sessions.create_session();
        sessions.append_message(
            &session.id,
            Message::system("prompt").with_metadata("type", "system_prompt"),
        );
        sessions.append_message(&session.id, Message::user("fork here"));
        let snapshot = sessions.current_session().unwrap();
        let last = snapshot.messages.last().cloned().unwrap();

        let metadata =
            CheckpointMetadata::new(CheckpointType::Auto, &snapshot, last.id.clone());
        let cp_id = metadata.id.clone();
        manager.write_checkpoint(snapshot, metadata);

        let branch_cp = manager
            .branch_from_checkpoint(&cp_id, Some("experiment".into()), None)
            .unwrap();
        assert!(branch_cp.starts_with("cp-"));

        let live = sessions.current_session().unwrap();
        assert_eq!(live.metadata.branched_from.as_deref(), Some(cp_id.as_str()));
        assert_eq!(live.metadata.branch_point.as_deref(), Some(last.id.as_str()));
        assert!(live.metadata.flattened);
        assert_ne!(live.id, session.id, "branch gets its own identity");
    }

    #[test]
    fn test_collect_lineage_walks_to_root() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let root = sessions.create_session();
        sessions.append_message(&root.id, Message::user("start"));
        let mid = sessions.create_continuation_session(&root.id).unwrap();
        let tip = sessions.create_continuation_session(&mid.id).unwrap();

        let lineage = manager.collect_lineage(&tip.id);
        assert_eq!(lineage, vec![root.id, mid.id, tip.id]);
    }

    #[test]
    fn test_flatten_dedupes_system_by_type() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let root = sessions.create_session();
        sessions.append_message(
            &root.id,
            Message::system("old prompt").with_metadata("type", "system_prompt"),
        );
        sessions.append_message(&root.id, Message::user("q1"));
        let continuation = sessions.create_continuation_session(&root.id).unwrap();
        sessions.append_message(
            &continuation.id,
            Message::system("new prompt").with_metadata("type", "system_prompt"),
        );
        sessions.append_message(&continuation.id, Message::user("q2"));

        let tail = sessions.current_session().unwrap();
        let flat = manager.build_flat_snapshot(&tail);

        // Only the newest system_prompt survives; dialog from the whole
        // chain is present.
        let prompts: Vec<_> = flat
            .messages
            .iter()
            .filter(|m| m.type_tag() == Some("system_prompt"))
            .collect();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].content.text_lossy(), "new prompt");

        let dialog = flat.messages_by_category(MessageCategory::Dialog);
        assert_eq!(dialog.len(), 2);
        assert!(flat.metadata.flattened);
    }

    #[test]
    fn test_cleanup_spares_manual_and_branch() {
        // Scenario E: over-cap auto checkpoints are pruned; manual and
        // branch checkpoints are untouchable.
        let dir = tempdir().unwrap();
        let config = CheckpointConfig {
            keep_all_hours: 1,
            max_auto_checkpoints: 1000,
            ..CheckpointConfig::default()
        };
        let (sessions, manager) = setup(dir.path(), config);

        let session = sessions.create_session();
        let msg = Message::user("m");

        {
            let mut index = manager.index.lock();
            let now = chrono::Utc::now().timestamp_millis();
            for i in 0..1200 {
                let mut metadata =
                    CheckpointMetadata::new(CheckpointType::Auto, &session, msg.id.clone());
                metadata.id = format!("cp-auto-{i:04}");
                metadata.created_at = now - i as i64 * 1000;
                index.insert(metadata.id.clone(), metadata);
            }
            for kind in [CheckpointType::Manual, CheckpointType::Branch] {
                let mut metadata = CheckpointMetadata::new(kind, &session, msg.id.clone());
                metadata.id = format!("cp-{kind:?}");
                metadata.created_at = now - 500_000_000;
                index.insert(metadata.id.clone(), metadata);
            }
        }

        let deleted = manager.perform_cleanup();
        assert_eq!(deleted, 200);

        let auto_left = manager.list_checkpoints(None, Some(CheckpointType::Auto), 5000);
        assert!(auto_left.len() <= 1000);
        assert_eq!(
            manager
                .list_checkpoints(None, Some(CheckpointType::Manual), 10)
                .len(),
            1
        );
        assert_eq!(
            manager
                .list_checkpoints(None, Some(CheckpointType::Branch), 10)
                .len(),
            1
        );
    }

    #[test]
    fn test_list_checkpoints_filters_and_orders() {
        let dir = tempdir().unwrap();
        let (sessions, manager) = setup(dir.path(), CheckpointConfig::default());

        let session = sessions.create_session();
        let other = sessions.create_session();
        let msg = Message::user("m");

        {
            let mut index = manager.index.lock();
            for (i, (sid, kind)) in [
                (&session.id, CheckpointType::Auto),
                (&session.id, CheckpointType::Manual),
                (&other.id, CheckpointType::Auto),
            ]
            .iter()
            .enumerate()
            {
                let mut s = Session::new();
                s.id = (*sid).clone();
                let mut metadata = CheckpointMetadata::new(*kind, &s, msg.id.clone());
                metadata.id = format!("cp-{i}");
                metadata.created_at = 1000 + i as i64;
                index.insert(metadata.id.clone(), metadata);
            }
        }

        let all = manager.list_checkpoints(None, None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "cp-2", "newest first");

        let for_session = manager.list_checkpoints(Some(&session.id), None, 10);
        assert_eq!(for_session.len(), 2);

        let manual_only = manager.list_checkpoints(None, Some(CheckpointType::Manual), 10);
        assert_eq!(manual_only.len(), 1);

        let limited = manager.list_checkpoints(None, None, 1);
        assert_eq!(limited.len(), 1);
    }

    /// Drain pending creation jobs synchronously, returning their metadata.
    fn drain_create_queue(manager: &CheckpointManager) -> Vec<CheckpointMetadata> {
        let mut rx = manager.create_rx.lock().take().unwrap();
        let mut drained = Vec::new();
        while let Ok(job) = rx.try_recv() {
            if let CreateJob::Write(boxed) = job {
                drained.push(boxed.1.clone());
            }
        }
        drained
    }
}
