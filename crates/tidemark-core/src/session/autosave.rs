//! Auto-save loop: periodically flushes dirty cached sessions.
//!
//! Bounds the data-loss window to the configured interval. The loop is a
//! long-lived task controlled through a command channel; stopping always
//! performs one final flush.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::SessionManager;

/// Commands accepted by the auto-save loop.
#[derive(Debug)]
enum AutosaveCommand {
    /// Flush immediately, outside the normal cadence.
    FlushNow,
    /// Flush once more, then exit.
    Stop,
}

/// Handle to a running auto-save loop.
pub struct AutosaveHandle {
    command_tx: mpsc::Sender<AutosaveCommand>,
    join: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Request an immediate flush.
    pub async fn flush_now(&self) -> Result<()> {
        self.command_tx
            .send(AutosaveCommand::FlushNow)
            .await
            .map_err(|e| anyhow!("failed to send flush command: {}", e))
    }

    /// Stop the loop after a final flush and wait for it to exit.
    pub async fn stop(self) {
        if self.command_tx.send(AutosaveCommand::Stop).await.is_err() {
            warn!("auto-save loop already gone");
        }
        if let Err(e) = self.join.await {
            warn!(error = %e, "auto-save task join failed");
        }
    }
}

/// Spawn the auto-save loop for `manager`.
pub fn start(manager: Arc<SessionManager>, period: Duration) -> AutosaveHandle {
    let (command_tx, mut command_rx) = mpsc::channel(8);

    let join = tokio::spawn(async move {
        let mut tick = interval(period);
        // The first tick fires immediately; skip it so a fresh engine
        // doesn't flush an empty cache at startup.
        tick.tick().await;

        info!(period_secs = period.as_secs(), "auto-save loop started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let saved = manager.flush_dirty();
                    if saved > 0 {
                        debug!(saved, "auto-save flushed sessions");
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(AutosaveCommand::FlushNow) => {
                            manager.flush_dirty();
                        }
                        Some(AutosaveCommand::Stop) | None => {
                            manager.flush_dirty();
                            break;
                        }
                    }
                }
            }
        }

        info!("auto-save loop stopped");
    });

    AutosaveHandle { command_tx, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::models::Message;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> Arc<SessionManager> {
        let config = SessionConfig {
            max_messages_per_session: 100,
            max_cached_sessions: 8,
            autosave_interval_secs: 60,
        };
        Arc::new(SessionManager::new(dir, &config).unwrap())
    }

    #[tokio::test]
    async fn test_flush_now_persists_dirty_sessions() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let session = manager.create_session();
        manager.append_message(&session.id, Message::user("unsaved"));

        let handle = start(manager.clone(), Duration::from_secs(3600));
        handle.flush_now().await.unwrap();
        handle.stop().await;

        assert!(dir.path().join(format!("{}.json", session.id)).exists());
    }

    #[tokio::test]
    async fn test_stop_performs_final_flush() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let session = manager.create_session();
        manager.append_message(&session.id, Message::user("flushed on stop"));

        let handle = start(manager.clone(), Duration::from_secs(3600));
        handle.stop().await;

        assert!(dir.path().join(format!("{}.json", session.id)).exists());
        // Flag cleared: nothing left for a manual flush
        assert_eq!(manager.flush_dirty(), 0);
    }

    #[tokio::test]
    async fn test_periodic_tick_flushes() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let session = manager.create_session();
        manager.append_message(&session.id, Message::user("periodic"));

        let handle = start(manager.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.stop().await;

        assert!(dir.path().join(format!("{}.json", session.id)).exists());
    }
}
