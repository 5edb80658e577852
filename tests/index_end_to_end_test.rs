//! End-to-end indexing through the orchestrator with the built-in
//! chunking parser and in-memory store.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use quarry::config::Settings;
use quarry::hash_string;
use quarry::indexing::IndexOrchestrator;
use quarry::parsing::{
    ChunkingParser, EnhanceError, ParsedSource, SnippetEnhancer, SourceParser,
};
use quarry::storage::{ArtifactStore, MemoryStore};

/// Wraps the chunking parser and counts batch processor invocations.
struct CountingParser {
    inner: ChunkingParser,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl SourceParser for CountingParser {
    async fn parse_files(&self, root: &Path, paths: &[PathBuf]) -> Vec<ParsedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.parse_files(root, paths).await
    }
}

fn test_settings(batch_size: usize) -> Settings {
    let mut settings = Settings::default();
    settings.batch.batch_size = batch_size;
    settings.batch.max_concurrency = 2;
    settings.batch.retry_attempts = 0;
    settings.indexing.chunk_size = 50;
    settings.indexing.overlap_size = 5;
    settings
}

fn three_file_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("alpha.rs"), "fn alpha() {}\n").unwrap();
    fs::write(temp.path().join("beta.rs"), "fn beta() {}\n").unwrap();
    fs::write(temp.path().join("gamma.rs"), "fn gamma() {}\n").unwrap();
    temp
}

fn orchestrator_with_counter(
    batch_size: usize,
    delay: Duration,
) -> (Arc<IndexOrchestrator>, Arc<AtomicUsize>, Arc<MemoryStore>) {
    let settings = Arc::new(test_settings(batch_size));
    let calls = Arc::new(AtomicUsize::new(0));
    let parser = Arc::new(CountingParser {
        inner: ChunkingParser::from_config(&settings.indexing),
        calls: Arc::clone(&calls),
        delay,
    });
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn ArtifactStore> = store.clone();
    let orchestrator =
        Arc::new(IndexOrchestrator::new(settings, parser, store_dyn).unwrap());
    (orchestrator, calls, store)
}

#[tokio::test]
async fn test_three_files_batch_size_two() {
    let project = three_file_project();
    let (orchestrator, calls, _store) = orchestrator_with_counter(2, Duration::ZERO);

    let report = orchestrator.create_index(project.path()).await.unwrap();

    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.files_processed, 3);
    assert_eq!(report.files_failed, 0);
    assert!(report.chunks_stored >= 3);
    // 3 files at batch size 2 -> one batch of 2, one of 1.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_project_id_stable_for_unchanged_content() {
    let project = three_file_project();
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::ZERO);

    let first = orchestrator.create_index(project.path()).await.unwrap();
    let second = orchestrator.create_index(project.path()).await.unwrap();

    assert!(first.success && second.success);
    assert_eq!(first.project_id, second.project_id);
    // Unchanged content re-stores nothing new.
    assert_eq!(second.chunks_stored, 0);
}

#[tokio::test]
async fn test_check_for_duplicates_by_hash_equality() {
    let project = three_file_project();
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::ZERO);

    let report = orchestrator.create_index(project.path()).await.unwrap();
    let project_id = report.project_id.unwrap();

    // Snippet content is the file body as joined lines.
    assert!(
        orchestrator
            .check_for_duplicates("fn alpha() {}", &project_id)
            .await
            .unwrap()
    );
    assert!(
        !orchestrator
            .check_for_duplicates("fn alphb() {}", &project_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_concurrent_create_is_hard_error() {
    let project = three_file_project();
    // Slow parser keeps the first run holding the indexing flag.
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::from_millis(400));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let root = project.path().to_path_buf();
        tokio::spawn(async move { orchestrator.create_index(&root).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(orchestrator.get_active_indexing().len(), 1);

    let second = orchestrator.create_index(project.path()).await;
    assert!(matches!(
        second,
        Err(quarry::types::IndexError::AlreadyIndexing(_))
    ));

    let first = first.await.unwrap().unwrap();
    assert!(first.success);
    // Flag cleared once the run finishes.
    assert!(orchestrator.get_active_indexing().is_empty());
}

#[tokio::test]
async fn test_concurrent_update_is_soft_failure() {
    let project = three_file_project();
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::from_millis(400));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let root = project.path().to_path_buf();
        tokio::spawn(async move { orchestrator.create_index(&root).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;

    let changed = vec![project.path().join("alpha.rs")];
    let report = orchestrator.update_index(project.path(), &changed).await;
    assert!(!report.success);
    assert!(report.errors[0].contains("already being indexed"));

    assert!(first.await.unwrap().unwrap().success);
}

#[tokio::test]
async fn test_update_index_parses_only_given_files() {
    let project = three_file_project();
    let (orchestrator, calls, _store) = orchestrator_with_counter(10, Duration::ZERO);

    orchestrator.create_index(project.path()).await.unwrap();
    calls.store(0, Ordering::SeqCst);

    let changed = vec![project.path().join("alpha.rs")];
    let report = orchestrator.update_index(project.path(), &changed).await;

    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.files_processed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_graph_analysis_unsupported_is_empty() {
    let project = three_file_project();
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::ZERO);

    let report = orchestrator.create_index(project.path()).await.unwrap();
    let project_id = report.project_id.unwrap();

    // The in-memory store supports none of the graph queries; the
    // orchestrator converts that into empty, well-typed results.
    assert!(
        orchestrator
            .detect_cross_references(&project_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        orchestrator
            .analyze_dependencies(&project_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        orchestrator
            .detect_overlaps(&project_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_delete_index_removes_artifacts() {
    let project = three_file_project();
    let (orchestrator, _calls, store) = orchestrator_with_counter(2, Duration::ZERO);

    orchestrator.create_index(project.path()).await.unwrap();
    assert!(store.snippet_count() > 0);

    assert!(orchestrator.delete_index(project.path()).await);
    assert_eq!(store.snippet_count(), 0);
}

/// Appends a marker line to every snippet, rehashing its content.
struct MarkingEnhancer;

#[async_trait]
impl SnippetEnhancer for MarkingEnhancer {
    async fn enhance(&self, mut parsed: ParsedSource) -> Result<ParsedSource, EnhanceError> {
        for snippet in &mut parsed.snippets {
            snippet.content.push_str("\n// reviewed");
            snippet.content_hash = hash_string(&snippet.content);
        }
        Ok(parsed)
    }
}

#[tokio::test]
async fn test_enhancement_stage_runs_when_enabled() {
    let project = three_file_project();

    let mut settings = test_settings(2);
    settings.indexing.enable_lsp = true;
    let settings = Arc::new(settings);

    let parser = Arc::new(ChunkingParser::from_config(&settings.indexing));
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn ArtifactStore> = store.clone();
    let orchestrator = IndexOrchestrator::new(settings, parser, store_dyn)
        .unwrap()
        .with_enhancer(Arc::new(MarkingEnhancer));

    let report = orchestrator.create_index(project.path()).await.unwrap();
    assert!(report.success, "errors: {:?}", report.errors);

    let project_id = report.project_id.unwrap();
    // Stored snippets carry the enhancer's marker, not the raw content.
    assert!(
        orchestrator
            .check_for_duplicates("fn alpha() {}\n// reviewed", &project_id)
            .await
            .unwrap()
    );
    assert!(
        !orchestrator
            .check_for_duplicates("fn alpha() {}", &project_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_status_reports_statistics() {
    let project = three_file_project();
    let (orchestrator, _calls, _store) = orchestrator_with_counter(2, Duration::ZERO);

    orchestrator.create_index(project.path()).await.unwrap();
    let status = orchestrator.get_status(project.path()).await.unwrap();

    assert!(!status.is_indexing);
    let stats = status.statistics.unwrap();
    assert_eq!(stats.processed_snippets, 3);
}
