//! Storage seam for vector/graph persistence.
//!
//! The engine never talks to a concrete database; it hands parsed records
//! to an [`ArtifactStore`] keyed by content-addressed project id. Graph
//! analysis queries are optional: backends that do not support them return
//! [`StorageError::Unsupported`], which callers convert into empty results.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::parsing::{ParsedSource, Snippet};
use crate::types::ProjectId;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend rejected {operation}: {cause}")]
    Backend { operation: String, cause: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of persisting a set of parsed files.
#[derive(Debug, Clone, Default)]
pub struct StoreOutcome {
    pub success: bool,
    pub chunks_stored: usize,
    pub errors: Vec<String>,
}

/// Per-project snippet counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SnippetStatistics {
    pub total_snippets: usize,
    pub processed_snippets: usize,
    pub duplicate_snippets: usize,
    /// Fraction of stored snippets that were new content.
    pub processing_rate: f64,
}

/// A symbol reference crossing snippet boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub from_snippet: String,
    pub to_snippet: String,
    pub symbol: String,
}

/// One edge of the file dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_file: PathBuf,
    pub to_file: PathBuf,
}

/// Two snippets covering overlapping line ranges of the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetOverlap {
    pub first: String,
    pub second: String,
    pub overlapping_lines: u32,
}

/// Persistence collaborator for parsed artifacts.
///
/// Writes are best-effort across backends; there is no cross-store
/// transaction. Deletions and stores for the same batch must be issued by
/// the caller in the order it needs them applied.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist parsed files under the project key. Duplicate snippets
    /// (same content hash) are counted, not re-stored.
    async fn store(
        &self,
        parsed: &[ParsedSource],
        project_id: &ProjectId,
    ) -> StorageResult<StoreOutcome>;

    /// Remove all snippets belonging to the given relative paths.
    async fn delete_files(
        &self,
        project_id: &ProjectId,
        relative_paths: &[PathBuf],
    ) -> StorageResult<()>;

    /// Remove every artifact of the project.
    async fn delete_project(&self, project_id: &ProjectId) -> StorageResult<()>;

    /// Look up a stored snippet by content hash.
    async fn find_snippet_by_hash(
        &self,
        hash: &str,
        project_id: &ProjectId,
    ) -> StorageResult<Option<Snippet>>;

    async fn snippet_statistics(&self, project_id: &ProjectId) -> StorageResult<SnippetStatistics>;

    /// Graph analysis: may return [`StorageError::Unsupported`].
    async fn cross_references(&self, project_id: &ProjectId) -> StorageResult<Vec<CrossReference>>;

    /// Graph analysis: may return [`StorageError::Unsupported`].
    async fn dependency_graph(&self, project_id: &ProjectId) -> StorageResult<Vec<DependencyEdge>>;

    /// Graph analysis: may return [`StorageError::Unsupported`].
    async fn snippet_overlaps(&self, project_id: &ProjectId) -> StorageResult<Vec<SnippetOverlap>>;
}
