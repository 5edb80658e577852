use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::StorageError;

/// Content-addressed identity of an indexed project.
///
/// Derived from a deterministic hash over the directory tree, so the same
/// content produces the same id regardless of where the tree lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of filesystem change reported by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One detected filesystem change, consumed once by incremental indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub kind: ChangeKind,
    /// Absolute path of the changed file.
    pub path: PathBuf,
    /// Path relative to the project root, used as the storage key.
    pub relative_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl FileChangeEvent {
    pub fn new(kind: ChangeKind, path: PathBuf, relative_path: PathBuf) -> Self {
        Self {
            kind,
            path,
            relative_path,
            timestamp: Utc::now(),
        }
    }
}

/// Structured outcome of an indexing operation.
///
/// Ordinary processing failures never surface as errors from
/// `create_index`/`update_index`; they come back here with `success = false`
/// and a non-empty `errors` list.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub success: bool,
    pub project_id: Option<ProjectId>,
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_stored: usize,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl IndexReport {
    /// Failed report carrying a single error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    /// Successful empty report (e.g. nothing to do).
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// Current indexing state of a project, as reported by `get_status`.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub project_id: ProjectId,
    pub is_indexing: bool,
    pub statistics: Option<crate::storage::SnippetStatistics>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Hard error: `create_index` refuses to run twice for the same project.
    #[error("project {0} is already being indexed")]
    AlreadyIndexing(ProjectId),

    #[error("memory pressure: {0}")]
    MemoryPressure(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

/// Result type for orchestrator operations.
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_display() {
        let id = ProjectId::new("abcdef0123456789");
        assert_eq!(id.to_string(), "abcdef0123456789");
        assert_eq!(id.short(), "abcdef012345");
    }

    #[test]
    fn test_project_id_short_on_small_hash() {
        let id = ProjectId::new("abc");
        assert_eq!(id.short(), "abc");
    }

    #[test]
    fn test_failed_report() {
        let report = IndexReport::failed("boom");
        assert!(!report.success);
        assert_eq!(report.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn test_change_kind_serde() {
        let json = serde_json::to_string(&ChangeKind::Deleted).unwrap();
        assert_eq!(json, "\"deleted\"");
    }
}
