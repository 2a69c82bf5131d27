//! Tidemark core - session persistence, token budgeting, and checkpointing
//! for a conversational agent runtime.
//!
//! The [`Engine`] wires the three subsystems together and owns their
//! background workers: session auto-save, checkpoint creation, and
//! checkpoint cleanup.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod counter;
pub mod models;
pub mod session;

pub use checkpoint::CheckpointManager;
pub use config::EngineConfig;
pub use context::ContextWindowManager;
pub use counter::{HeuristicCounter, TokenCounter};
pub use models::{
    CheckpointMetadata, CheckpointRecord, CheckpointType, ContentPart, Message, MessageCategory,
    MessageContent, MetadataValue, Role, Session, SessionIndexEntry, SessionMetadata, TokenBudget,
};
pub use session::SessionManager;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::info;

use checkpoint::CheckpointWorkers;
use session::AutosaveHandle;

struct EngineWorkers {
    autosave: Option<AutosaveHandle>,
    checkpoints: CheckpointWorkers,
}

/// Persistence and memory-budget engine.
///
/// Owns one `SessionManager`, one `ContextWindowManager`, and one
/// `CheckpointManager`; the hosting runtime appends messages and the
/// engine keeps state durable and within budget.
pub struct Engine {
    pub config: EngineConfig,
    pub sessions: Arc<SessionManager>,
    pub context: Mutex<ContextWindowManager>,
    pub checkpoints: Arc<CheckpointManager>,
    workers: Mutex<Option<EngineWorkers>>,
}

impl Engine {
    /// Build the engine under `config.workspace` with an injected token
    /// counter. Workers are not running until [`Engine::start`].
    pub fn new(config: EngineConfig, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        let sessions = Arc::new(SessionManager::new(
            &config.conversations_dir(),
            &config.session,
        )?);
        let context = Mutex::new(ContextWindowManager::new(&config.context, counter));
        let checkpoints = Arc::new(CheckpointManager::new(
            &config.checkpoints_dir(),
            sessions.clone(),
            config.checkpoint.clone(),
        )?);

        info!(workspace = %config.workspace.display(), "engine initialized");

        Ok(Self {
            config,
            sessions,
            context,
            checkpoints,
            workers: Mutex::new(None),
        })
    }

    /// Spawn the background workers. Idempotent per engine.
    pub fn start(&self) {
        let mut slot = self.workers.lock();
        if slot.is_some() {
            return;
        }

        let autosave_secs = self.config.session.autosave_interval_secs;
        let autosave = (autosave_secs > 0).then(|| {
            session::autosave::start(self.sessions.clone(), Duration::from_secs(autosave_secs))
        });

        *slot = Some(EngineWorkers {
            autosave,
            checkpoints: self.checkpoints.start_workers(),
        });
    }

    /// Flush all pending state and stop the workers.
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            // Drain the checkpoint queues before cancelling their loops.
            self.checkpoints.flush().await;
            if let Some(autosave) = workers.autosave {
                autosave.stop().await;
            }
            workers.checkpoints.stop().await;
        }
        self.sessions.flush_dirty();
        info!("engine shut down");
    }

    /// Record a message on the live session (creating one if needed).
    ///
    /// Counts tokens, appends, auto-checkpoints when due, and splits into a
    /// continuation session at the message-count boundary. Returns the id
    /// of the session now holding the conversation.
    pub fn record_message(&self, mut message: Message) -> Result<String> {
        let session = match self.sessions.current_session() {
            Some(session) => session,
            None => self.sessions.create_session(),
        };

        if message.tokens == 0 {
            message.tokens = self.context.lock().measure(&message.content);
        }

        let should_checkpoint = self.checkpoints.should_checkpoint(&message);
        self.sessions.append_message(&session.id, message.clone());

        let session = self
            .sessions
            .current_session()
            .ok_or_else(|| anyhow::anyhow!("live session missing after append"))?;

        if should_checkpoint {
            self.checkpoints
                .create_checkpoint(&session, &message, CheckpointType::Auto, None, None);
        }

        if self.sessions.check_session_boundary(&session) {
            let continuation = self.sessions.create_continuation_session(&session.id)?;
            return Ok(continuation.id);
        }

        Ok(session.id)
    }

    /// Run the live session through budgeting and trimming, replacing it if
    /// anything changed.
    pub fn process_current_session(&self) -> Option<Session> {
        let session = self.sessions.current_session()?;
        let processed = self.context.lock().process_session(&session);
        if processed != session {
            self.sessions.replace_session(processed.clone());
        }
        Some(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path());
        let engine = Engine::new(config, Arc::new(HeuristicCounter::default())).unwrap();
        engine.start();

        let session_id = engine.record_message(Message::user("hello")).unwrap();
        engine.record_message(Message::assistant("hi there")).unwrap();

        engine.shutdown().await;

        // Both the session file and an auto checkpoint landed on disk
        assert!(
            dir.path()
                .join("conversations")
                .join(format!("{session_id}.json"))
                .exists()
        );
        let checkpoints = engine.checkpoints.list_checkpoints(None, None, 10);
        assert_eq!(checkpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_record_message_counts_tokens_lazily() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path());
        let engine = Engine::new(config, Arc::new(HeuristicCounter::default())).unwrap();

        engine.record_message(Message::user("a".repeat(40))).unwrap();
        let session = engine.sessions.current_session().unwrap();
        assert_eq!(session.messages[0].tokens, 11);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_boundary_splits_into_continuation() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.session.max_messages_per_session = 3;
        let engine = Engine::new(config, Arc::new(HeuristicCounter::default())).unwrap();

        let first = engine.record_message(Message::user("1")).unwrap();
        engine.record_message(Message::user("2")).unwrap();
        let after_boundary = engine.record_message(Message::user("3")).unwrap();

        assert_ne!(first, after_boundary);
        let continuation = engine.sessions.current_session().unwrap();
        assert_eq!(
            continuation.metadata.continued_from.as_deref(),
            Some(first.as_str())
        );

        engine.shutdown().await;
    }
}
