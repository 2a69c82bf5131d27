//! Background workers for checkpoint creation and cleanup.
//!
//! One worker owns the creation queue and persists requests strictly in
//! arrival order; the other runs retention passes. Both stop through a
//! shared cancellation token. Because every file write stages through a
//! temp file, cancelling mid-job can abandon work but never exposes a
//! partial checkpoint.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CheckpointManager, CleanupJob, CreateJob};

/// Handles to the running checkpoint workers.
pub struct CheckpointWorkers {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl CheckpointWorkers {
    /// Cancel both loops and wait for them to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "checkpoint worker join failed");
            }
        }
        info!("checkpoint workers stopped");
    }
}

impl CheckpointManager {
    /// Spawn the creation and cleanup workers.
    ///
    /// May be called once per manager; the queue receivers move into the
    /// spawned tasks.
    pub fn start_workers(self: &Arc<Self>) -> CheckpointWorkers {
        let cancel = CancellationToken::new();

        let (create_rx, cleanup_rx) =
            match (self.create_rx.lock().take(), self.cleanup_rx.lock().take()) {
                (Some(create_rx), Some(cleanup_rx)) => (create_rx, cleanup_rx),
                _ => {
                    warn!("checkpoint workers already started, ignoring");
                    return CheckpointWorkers {
                        cancel,
                        joins: Vec::new(),
                    };
                }
            };

        let creation = tokio::spawn(creation_loop(self.clone(), create_rx, cancel.clone()));
        let cleanup = tokio::spawn(cleanup_loop(self.clone(), cleanup_rx, cancel.clone()));

        info!("checkpoint workers started");
        CheckpointWorkers {
            cancel,
            joins: vec![creation, cleanup],
        }
    }
}

async fn creation_loop(
    manager: Arc<CheckpointManager>,
    mut rx: mpsc::UnboundedReceiver<CreateJob>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(CreateJob::Write(boxed)) => {
                    let (session, metadata) = *boxed;
                    manager.write_checkpoint(session, metadata);
                }
                Some(CreateJob::Flush(ack)) => {
                    let _ = ack.send(());
                }
                None => break,
            }
        }
    }
}

async fn cleanup_loop(
    manager: Arc<CheckpointManager>,
    mut rx: mpsc::UnboundedReceiver<CleanupJob>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(CleanupJob::Run) => {
                    manager.perform_cleanup();
                }
                Some(CleanupJob::Flush(ack)) => {
                    let _ = ack.send(());
                }
                None => break,
            }
        }
    }
}
