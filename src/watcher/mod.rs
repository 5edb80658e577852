//! Filesystem watcher feeding incremental indexing.
//!
//! Translates raw notify events into debounced [`FileChangeEvent`] batches
//! and hands them to the orchestrator. Deletions in a batch are applied to
//! storage before creations and modifications, which the orchestrator
//! guarantees.

mod debouncer;

pub use debouncer::Debouncer;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use crate::indexing::IndexOrchestrator;
use crate::types::{ChangeKind, FileChangeEvent, IndexError};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("indexing error: {0}")]
    Index(#[from] IndexError),
}

/// Watches one project root and applies changes incrementally.
pub struct ChangeWatcher {
    root: PathBuf,
    orchestrator: Arc<IndexOrchestrator>,
    debouncer: Debouncer,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    _watcher: notify::RecommendedWatcher,
    cancel: CancellationToken,
}

impl ChangeWatcher {
    /// Watch `root` recursively with the given debounce window.
    pub fn new(
        root: impl Into<PathBuf>,
        orchestrator: Arc<IndexOrchestrator>,
        debounce_ms: u64,
    ) -> Result<Self, WatchError> {
        let root = root.into();
        let (event_tx, event_rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res| {
            // Dropped receiver just means the watcher is shutting down.
            let _ = event_tx.blocking_send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            orchestrator,
            debouncer: Debouncer::new(debounce_ms),
            event_rx,
            _watcher: watcher,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the watch loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the watch loop until cancelled.
    ///
    /// 1. Receives file events from notify
    /// 2. Debounces them per path
    /// 3. Flushes settled batches into `process_incremental_changes`
    pub async fn watch(mut self) -> Result<(), WatchError> {
        tracing::info!(target: "watcher", "watching {}", self.root.display());

        loop {
            let tick = sleep(Duration::from_millis(100));
            tokio::pin!(tick);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "watcher", "stopped");
                    return Ok(());
                }

                Some(res) = self.event_rx.recv() => {
                    match res {
                        Ok(event) => self.handle_event(event),
                        Err(e) => tracing::error!(target: "watcher", "file watch error: {e}"),
                    }
                }

                _ = &mut tick => {
                    self.flush_ready().await;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        let Some(kind) = map_event_kind(&event.kind) else {
            return;
        };
        for path in event.paths {
            if path.starts_with(&self.root) {
                self.debouncer.record(path, kind);
            }
        }
    }

    async fn flush_ready(&mut self) {
        let ready = self.debouncer.take_ready();
        if ready.is_empty() {
            return;
        }

        let changes: Vec<FileChangeEvent> = ready
            .into_iter()
            .map(|(path, kind)| {
                let relative = path
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| path.clone());
                FileChangeEvent::new(kind, path, relative)
            })
            .collect();

        tracing::debug!(target: "watcher", "applying {} changes", changes.len());

        match self
            .orchestrator
            .process_incremental_changes(&self.root, &changes)
            .await
        {
            Ok(report) if !report.success => {
                tracing::warn!(
                    target: "watcher",
                    "incremental update incomplete: {}",
                    report.errors.join("; ")
                );
            }
            Ok(report) => {
                tracing::debug!(
                    target: "watcher",
                    "applied {} files, {} chunks",
                    report.files_processed,
                    report.chunks_stored
                );
            }
            Err(e) => {
                // Indexing fell behind; keep watching, the next change to
                // the same path re-queues it.
                tracing::error!(target: "watcher", "incremental indexing failed: {e}");
            }
        }
    }
}

fn map_event_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_event_kind() {
        assert_eq!(
            map_event_kind(&EventKind::Create(notify::event::CreateKind::File)),
            Some(ChangeKind::Created)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(ChangeKind::Deleted)
        );
        assert_eq!(map_event_kind(&EventKind::Access(notify::event::AccessKind::Read)), None);
    }
}
