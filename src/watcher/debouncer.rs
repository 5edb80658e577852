//! Shared debouncing logic for file change events.
//!
//! Debouncing prevents excessive re-indexing when files are saved
//! multiple times in quick succession (e.g., auto-save, IDE formatting).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::types::ChangeKind;

/// Debounces file change events by path.
///
/// Records change timestamps and returns paths that have been stable
/// for the configured duration, with the merged change kind.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending changes: path -> (merged kind, last change timestamp).
    pending: HashMap<PathBuf, (ChangeKind, Instant)>,
    /// How long a file must be stable before processing.
    duration: Duration,
}

impl Debouncer {
    /// Create a new debouncer with the given duration in milliseconds.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record a file change event, resetting the timer for this path and
    /// merging the kind with any pending change.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        let merged = match self.pending.get(&path) {
            Some((pending, _)) => merge_kinds(*pending, kind),
            None => kind,
        };
        self.pending.insert(path, (merged, Instant::now()));
    }

    /// Take all changes that have been stable for the debounce duration.
    pub fn take_ready(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        let now = Instant::now();
        let mut ready = Vec::new();

        self.pending.retain(|path, (kind, last_change)| {
            if now.duration_since(*last_change) >= self.duration {
                ready.push((path.clone(), *kind));
                false
            } else {
                true
            }
        });

        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Collapse two changes to the same path into one effective change.
fn merge_kinds(pending: ChangeKind, new: ChangeKind) -> ChangeKind {
    use ChangeKind::{Created, Deleted, Modified};
    match (pending, new) {
        // A brand new file stays "created" however often it is saved.
        (Created, Modified) => Created,
        // Deleting and re-creating within one window is a modification.
        (Deleted, Created) => Modified,
        (_, kind) => kind,
    }
}
