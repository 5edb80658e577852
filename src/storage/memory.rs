//! In-memory artifact store.
//!
//! Backs tests and single-shot CLI runs. Snippets are bucketed per project
//! and indexed by content hash for duplicate lookups. Graph analysis
//! queries are not implemented here and report `Unsupported`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{
    ArtifactStore, CrossReference, DependencyEdge, SnippetOverlap, SnippetStatistics,
    StorageResult, StoreOutcome,
};
use crate::parsing::{ParsedSource, Snippet};
use crate::storage::StorageError;
use crate::types::ProjectId;

#[derive(Debug, Default)]
struct ProjectBucket {
    /// Snippets in insertion order.
    snippets: Vec<Snippet>,
    /// content hash -> index into `snippets`.
    by_hash: HashMap<String, usize>,
    stats: SnippetStatistics,
}

/// DashMap-backed store keyed by project id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: DashMap<ProjectId, ProjectBucket>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total snippets held across all projects.
    pub fn snippet_count(&self) -> usize {
        self.projects.iter().map(|p| p.snippets.len()).sum()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn store(
        &self,
        parsed: &[ParsedSource],
        project_id: &ProjectId,
    ) -> StorageResult<StoreOutcome> {
        let mut bucket = self.projects.entry(project_id.clone()).or_default();
        let mut stored = 0;

        for source in parsed {
            for snippet in &source.snippets {
                bucket.stats.total_snippets += 1;
                if bucket.by_hash.contains_key(&snippet.content_hash) {
                    bucket.stats.duplicate_snippets += 1;
                    continue;
                }
                let index = bucket.snippets.len();
                bucket.by_hash.insert(snippet.content_hash.clone(), index);
                bucket.snippets.push(snippet.clone());
                bucket.stats.processed_snippets += 1;
                stored += 1;
            }
        }

        bucket.stats.processing_rate = if bucket.stats.total_snippets > 0 {
            bucket.stats.processed_snippets as f64 / bucket.stats.total_snippets as f64
        } else {
            0.0
        };

        tracing::debug!(
            target: "storage",
            "stored {stored} snippets for project {}",
            project_id.short()
        );

        Ok(StoreOutcome {
            success: true,
            chunks_stored: stored,
            errors: Vec::new(),
        })
    }

    async fn delete_files(
        &self,
        project_id: &ProjectId,
        relative_paths: &[PathBuf],
    ) -> StorageResult<()> {
        let Some(mut bucket) = self.projects.get_mut(project_id) else {
            return Ok(());
        };

        bucket
            .snippets
            .retain(|s| !relative_paths.contains(&s.relative_path));

        // Rebuild the hash index after compaction.
        bucket.by_hash = bucket
            .snippets
            .iter()
            .enumerate()
            .map(|(i, s)| (s.content_hash.clone(), i))
            .collect();

        Ok(())
    }

    async fn delete_project(&self, project_id: &ProjectId) -> StorageResult<()> {
        self.projects.remove(project_id);
        Ok(())
    }

    async fn find_snippet_by_hash(
        &self,
        hash: &str,
        project_id: &ProjectId,
    ) -> StorageResult<Option<Snippet>> {
        Ok(self.projects.get(project_id).and_then(|bucket| {
            bucket
                .by_hash
                .get(hash)
                .map(|&index| bucket.snippets[index].clone())
        }))
    }

    async fn snippet_statistics(&self, project_id: &ProjectId) -> StorageResult<SnippetStatistics> {
        Ok(self
            .projects
            .get(project_id)
            .map(|bucket| bucket.stats)
            .unwrap_or_default())
    }

    async fn cross_references(&self, _project_id: &ProjectId) -> StorageResult<Vec<CrossReference>> {
        Err(StorageError::Unsupported("cross_references"))
    }

    async fn dependency_graph(&self, _project_id: &ProjectId) -> StorageResult<Vec<DependencyEdge>> {
        Err(StorageError::Unsupported("dependency_graph"))
    }

    async fn snippet_overlaps(&self, _project_id: &ProjectId) -> StorageResult<Vec<SnippetOverlap>> {
        Err(StorageError::Unsupported("snippet_overlaps"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::Language;

    fn snippet(hash: &str, rel: &str) -> Snippet {
        Snippet {
            id: format!("{hash}:1"),
            content_hash: hash.to_string(),
            file_path: PathBuf::from("/project").join(rel),
            relative_path: PathBuf::from(rel),
            language: Language::Rust,
            start_line: 1,
            end_line: 10,
            content: "fn demo() {}".to_string(),
        }
    }

    fn parsed(rel: &str, snippets: Vec<Snippet>) -> ParsedSource {
        ParsedSource {
            file_path: PathBuf::from("/project").join(rel),
            relative_path: PathBuf::from(rel),
            language: Language::Rust,
            snippets,
            ..ParsedSource::default()
        }
    }

    #[tokio::test]
    async fn test_store_and_find_by_hash() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p1");

        let outcome = store
            .store(&[parsed("a.rs", vec![snippet("h1", "a.rs")])], &project)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.chunks_stored, 1);

        let found = store.find_snippet_by_hash("h1", &project).await.unwrap();
        assert!(found.is_some());
        assert!(
            store
                .find_snippet_by_hash("h2", &project)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_duplicates_counted_not_restored() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p1");

        let batch = [parsed(
            "a.rs",
            vec![snippet("h1", "a.rs"), snippet("h1", "a.rs")],
        )];
        let outcome = store.store(&batch, &project).await.unwrap();
        assert_eq!(outcome.chunks_stored, 1);

        let stats = store.snippet_statistics(&project).await.unwrap();
        assert_eq!(stats.total_snippets, 2);
        assert_eq!(stats.processed_snippets, 1);
        assert_eq!(stats.duplicate_snippets, 1);
        assert!((stats.processing_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_delete_files_removes_by_relative_path() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p1");

        store
            .store(
                &[
                    parsed("a.rs", vec![snippet("h1", "a.rs")]),
                    parsed("b.rs", vec![snippet("h2", "b.rs")]),
                ],
                &project,
            )
            .await
            .unwrap();

        store
            .delete_files(&project, &[PathBuf::from("a.rs")])
            .await
            .unwrap();

        assert!(
            store
                .find_snippet_by_hash("h1", &project)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_snippet_by_hash("h2", &project)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_delete_project() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p1");
        store
            .store(&[parsed("a.rs", vec![snippet("h1", "a.rs")])], &project)
            .await
            .unwrap();

        store.delete_project(&project).await.unwrap();
        assert_eq!(store.project_count(), 0);
    }

    #[tokio::test]
    async fn test_graph_queries_unsupported() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p1");
        assert!(matches!(
            store.cross_references(&project).await,
            Err(StorageError::Unsupported(_))
        ));
    }
}
