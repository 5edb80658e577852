//! Orchestration of full indexing, incremental updates, and dedup.
//!
//! Composes the pipeline engine for full runs (memory-gate, traversal,
//! batch-parse, optional enhancement, storage), drives the batch executor
//! directly for incremental updates, and owns per-project mutual exclusion
//! plus content-hash deduplication. Parsing and storage are collaborators
//! behind trait seams.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::hash::{DirectoryHash, DirectoryHasher, hash_string};
use super::stages::{
    EnhanceStage, IndexContext, MemoryGateStage, ParseStage, StoreStage, TraversalStage,
    enhance_batched, parse_batched,
};
use super::walker::FileWalker;
use crate::batch::{BatchExecutor, BatchOptions};
use crate::config::Settings;
use crate::memory::MemoryMonitor;
use crate::parsing::{NoopEnhancer, ParsedSource, SnippetEnhancer, SourceParser};
use crate::pipeline::{Pipeline, PipelineMetrics, PipelineOutcome, StagePolicy};
use crate::pool::{EvictionPolicy, PoolConfig, ResourcePool};
use crate::storage::{
    ArtifactStore, CrossReference, DependencyEdge, SnippetOverlap, StorageError,
};
use crate::types::{
    ChangeKind, FileChangeEvent, IndexError, IndexReport, IndexResult, IndexStatus, ProjectId,
};

/// Scratch buffers that ballooned past this are not worth pooling.
const MAX_SCRATCH_CAPACITY: usize = 8 * 1024 * 1024;

/// Clears the per-project indexing flag on every exit path.
struct ActiveGuard {
    active: Arc<DashMap<ProjectId, ()>>,
    project_id: ProjectId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.project_id);
    }
}

/// Central coordinator for project indexing.
pub struct IndexOrchestrator {
    settings: Arc<Settings>,
    walker: Arc<FileWalker>,
    hasher: Arc<DirectoryHasher>,
    parser: Arc<dyn SourceParser>,
    enhancer: Arc<dyn SnippetEnhancer>,
    store: Arc<dyn ArtifactStore>,
    monitor: Arc<MemoryMonitor>,
    executor: Arc<BatchExecutor>,
    metrics: Arc<PipelineMetrics>,
    active: Arc<DashMap<ProjectId, ()>>,
}

impl IndexOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        parser: Arc<dyn SourceParser>,
        store: Arc<dyn ArtifactStore>,
    ) -> IndexResult<Self> {
        let monitor = Arc::new(
            MemoryMonitor::from_config(&settings.memory)
                .map_err(|e| IndexError::General(e.to_string()))?,
        );

        let pool = Arc::new(
            ResourcePool::builder(Vec::new)
                .with_resetter(|buf: &mut Vec<u8>| buf.clear())
                .with_validator(|buf: &Vec<u8>| buf.capacity() <= MAX_SCRATCH_CAPACITY)
                .with_config(PoolConfig {
                    initial_size: settings.pool.initial_size,
                    max_size: settings.pool.max_size,
                    eviction_policy: EvictionPolicy::from_config(&settings.pool.eviction_policy),
                })
                .build(),
        );

        // Under pressure the monitor may drop every idle scratch buffer.
        {
            let pool = Arc::clone(&pool);
            monitor.add_reclaimer(move || pool.shrink_idle() > 0);
        }

        let hasher = Arc::new(DirectoryHasher::new(pool));
        let walker = Arc::new(FileWalker::new(
            settings.indexing.clone(),
            Arc::clone(&hasher),
        ));
        let executor = Arc::new(BatchExecutor::new(Arc::clone(&monitor)));

        Ok(Self {
            settings,
            walker,
            hasher,
            parser,
            enhancer: Arc::new(NoopEnhancer),
            store,
            monitor,
            executor,
            metrics: Arc::new(PipelineMetrics::new()),
            active: Arc::new(DashMap::new()),
        })
    }

    /// Replace the no-op enhancer with a real backend.
    pub fn with_enhancer(mut self, enhancer: Arc<dyn SnippetEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Fully index the project at `root`.
    ///
    /// The only hard error is [`IndexError::AlreadyIndexing`]; every other
    /// failure is reported through the returned [`IndexReport`].
    pub async fn create_index(&self, root: &Path) -> IndexResult<IndexReport> {
        let start = Instant::now();

        let dir_hash = match self.hash_directory(root).await {
            Ok(hash) => hash,
            Err(e) => {
                return Ok(IndexReport::failed(format!(
                    "failed to hash {}: {e}",
                    root.display()
                )));
            }
        };
        let project_id = ProjectId::new(dir_hash.hash);

        let _guard = self.begin_indexing(project_id.clone())?;

        tracing::info!(
            target: "indexing",
            "indexing {} as project {} ({} files)",
            root.display(),
            project_id.short(),
            dir_hash.file_count
        );

        let pipeline = self.build_create_pipeline();
        let ctx = IndexContext::new(root.to_path_buf(), project_id.clone());
        let outcome = pipeline.execute(ctx).await;

        let mut report = Self::report_from_outcome(project_id, outcome);
        report.elapsed = start.elapsed();
        Ok(report)
    }

    /// Re-index only `changed_files` for the project at `root`.
    ///
    /// Unlike `create_index`, a concurrent run is a soft failure: the
    /// report comes back unsuccessful instead of an error, so callers in a
    /// change-event loop do not have to treat it as exceptional.
    pub async fn update_index(&self, root: &Path, changed_files: &[PathBuf]) -> IndexReport {
        let start = Instant::now();

        if changed_files.is_empty() {
            return IndexReport::empty();
        }

        let dir_hash = match self.hash_directory(root).await {
            Ok(hash) => hash,
            Err(e) => {
                return IndexReport::failed(format!("failed to hash {}: {e}", root.display()));
            }
        };
        let project_id = ProjectId::new(dir_hash.hash);

        let _guard = match self.begin_indexing(project_id.clone()) {
            Ok(guard) => guard,
            Err(_) => {
                let mut report =
                    IndexReport::failed(format!("project {} is already being indexed", project_id.short()));
                report.project_id = Some(project_id);
                return report;
            }
        };

        let mut report = self
            .parse_and_store(root, changed_files.to_vec(), &project_id)
            .await;
        report.elapsed = start.elapsed();
        report
    }

    /// Apply a batch of watcher events.
    ///
    /// Deletions always reach storage before creations and modifications
    /// are parsed and stored, so an artifact deleted and re-created in the
    /// same batch cannot be resurrected out of order. Storage failures are
    /// re-thrown: a change watcher needs to know indexing fell behind.
    pub async fn process_incremental_changes(
        &self,
        root: &Path,
        changes: &[FileChangeEvent],
    ) -> IndexResult<IndexReport> {
        if changes.is_empty() {
            return Ok(IndexReport::empty());
        }

        let start = Instant::now();
        let dir_hash = self.hash_directory(root).await?;
        let project_id = ProjectId::new(dir_hash.hash);

        let deletions: Vec<PathBuf> = changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Deleted)
            .map(|c| c.relative_path.clone())
            .collect();
        if !deletions.is_empty() {
            self.store.delete_files(&project_id, &deletions).await?;
            tracing::debug!(
                target: "indexing",
                "removed {} deleted files from project {}",
                deletions.len(),
                project_id.short()
            );
        }

        let upserts: Vec<PathBuf> = changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Deleted)
            .map(|c| c.path.clone())
            .collect();

        let mut report = if upserts.is_empty() {
            let mut report = IndexReport::empty();
            report.project_id = Some(project_id);
            report
        } else {
            let (parsed, files_failed) = parse_batched(
                &self.parser,
                &self.executor,
                &self.parse_options(),
                root,
                upserts,
            )
            .await
            .map_err(|e| IndexError::General(e.to_string()))?;

            let parsed = self.maybe_enhance(parsed).await;
            let outcome = self.store.store(&parsed, &project_id).await?;

            IndexReport {
                success: outcome.success,
                project_id: Some(project_id),
                files_processed: parsed.len(),
                files_failed,
                chunks_stored: outcome.chunks_stored,
                errors: outcome.errors,
                elapsed: Duration::ZERO,
            }
        };

        report.elapsed = start.elapsed();
        Ok(report)
    }

    /// Remove all persisted artifacts for the project at `root`.
    ///
    /// Logs and returns `false` on failure rather than propagating.
    pub async fn delete_index(&self, root: &Path) -> bool {
        let dir_hash = match self.hash_directory(root).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(
                    target: "indexing",
                    "delete_index could not hash {}: {e}",
                    root.display()
                );
                return false;
            }
        };
        let project_id = ProjectId::new(dir_hash.hash);

        match self.store.delete_project(&project_id).await {
            Ok(()) => {
                tracing::info!(target: "indexing", "deleted project {}", project_id.short());
                true
            }
            Err(e) => {
                tracing::error!(
                    target: "indexing",
                    "delete_index failed for project {}: {e}",
                    project_id.short()
                );
                false
            }
        }
    }

    /// Current indexing state and storage statistics for `root`.
    pub async fn get_status(&self, root: &Path) -> IndexResult<IndexStatus> {
        let dir_hash = self.hash_directory(root).await?;
        let project_id = ProjectId::new(dir_hash.hash);

        let statistics = self.store.snippet_statistics(&project_id).await.ok();
        Ok(IndexStatus {
            is_indexing: self.active.contains_key(&project_id),
            project_id,
            statistics,
        })
    }

    /// Projects currently holding the indexing flag.
    pub fn get_active_indexing(&self) -> Vec<ProjectId> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    /// True iff a stored snippet with an identical content hash exists.
    ///
    /// Hash equality is the sole duplicate criterion; there is no
    /// secondary content comparison.
    pub async fn check_for_duplicates(
        &self,
        content: &str,
        project_id: &ProjectId,
    ) -> IndexResult<bool> {
        let hash = hash_string(content);
        let existing = self.store.find_snippet_by_hash(&hash, project_id).await?;
        Ok(existing.is_some())
    }

    /// Cross-snippet references from the graph backend, empty when the
    /// backend does not support the query.
    pub async fn detect_cross_references(
        &self,
        project_id: &ProjectId,
    ) -> IndexResult<Vec<CrossReference>> {
        Self::empty_when_unsupported(self.store.cross_references(project_id).await)
    }

    /// File dependency edges, empty when unsupported.
    pub async fn analyze_dependencies(
        &self,
        project_id: &ProjectId,
    ) -> IndexResult<Vec<DependencyEdge>> {
        Self::empty_when_unsupported(self.store.dependency_graph(project_id).await)
    }

    /// Overlapping snippet pairs, empty when unsupported.
    pub async fn detect_overlaps(
        &self,
        project_id: &ProjectId,
    ) -> IndexResult<Vec<SnippetOverlap>> {
        Self::empty_when_unsupported(self.store.snippet_overlaps(project_id).await)
    }

    fn empty_when_unsupported<T>(
        result: Result<Vec<T>, StorageError>,
    ) -> IndexResult<Vec<T>> {
        match result {
            Ok(items) => Ok(items),
            Err(StorageError::Unsupported(operation)) => {
                tracing::debug!(target: "indexing", "storage does not support {operation}");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically set the per-project indexing flag.
    fn begin_indexing(&self, project_id: ProjectId) -> IndexResult<ActiveGuard> {
        use dashmap::mapref::entry::Entry;
        match self.active.entry(project_id.clone()) {
            Entry::Occupied(_) => Err(IndexError::AlreadyIndexing(project_id)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(ActiveGuard {
                    active: Arc::clone(&self.active),
                    project_id,
                })
            }
        }
    }

    async fn hash_directory(&self, root: &Path) -> IndexResult<DirectoryHash> {
        let hasher = Arc::clone(&self.hasher);
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || hasher.hash_directory(&root))
            .await
            .map_err(|e| IndexError::General(format!("hashing task failed: {e}")))?
            .map_err(IndexError::Io)
    }

    fn parse_options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.settings.batch)
    }

    fn enhance_options(&self) -> BatchOptions {
        BatchOptions::from_config(&self.settings.batch)
            .with_timeout(Duration::from_millis(self.settings.indexing.lsp_timeout_ms))
    }

    fn build_create_pipeline(&self) -> Pipeline<IndexContext> {
        let batch = &self.settings.batch;
        let retry = StagePolicy::default()
            .no_timeout()
            .with_retries(batch.retry_attempts, batch.retry_delay());

        let mut pipeline = Pipeline::with_metrics(Arc::clone(&self.metrics))
            .add_stage(
                MemoryGateStage::new(Arc::clone(&self.monitor), batch.memory_threshold_percent),
                StagePolicy::default().with_timeout(Duration::from_secs(5)),
            )
            .add_stage(
                TraversalStage::new(Arc::clone(&self.walker)),
                retry.clone(),
            )
            .add_stage(
                ParseStage::new(
                    Arc::clone(&self.parser),
                    Arc::clone(&self.executor),
                    self.parse_options(),
                ),
                StagePolicy::default().no_timeout(),
            );

        if self.settings.indexing.enable_lsp {
            pipeline = pipeline.add_stage(
                EnhanceStage::new(
                    Arc::clone(&self.enhancer),
                    Arc::clone(&self.executor),
                    self.enhance_options(),
                ),
                // Enhancement is best-effort: on failure the pipeline
                // proceeds with the unenhanced context.
                StagePolicy::default().no_timeout().continue_on_error(),
            );
        }

        pipeline.add_stage(
            StoreStage::new(Arc::clone(&self.store)),
            retry,
        )
    }

    /// Shared tail of update/incremental runs: parse, enhance, store.
    async fn parse_and_store(
        &self,
        root: &Path,
        paths: Vec<PathBuf>,
        project_id: &ProjectId,
    ) -> IndexReport {
        let (parsed, files_failed) = match parse_batched(
            &self.parser,
            &self.executor,
            &self.parse_options(),
            root,
            paths,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => {
                let mut report = IndexReport::failed(e.to_string());
                report.project_id = Some(project_id.clone());
                return report;
            }
        };

        let parsed = self.maybe_enhance(parsed).await;

        match self.store.store(&parsed, project_id).await {
            Ok(outcome) => IndexReport {
                success: outcome.success,
                project_id: Some(project_id.clone()),
                files_processed: parsed.len(),
                files_failed,
                chunks_stored: outcome.chunks_stored,
                errors: outcome.errors,
                elapsed: Duration::ZERO,
            },
            Err(e) => {
                let mut report = IndexReport::failed(format!("storage rejected batch: {e}"));
                report.project_id = Some(project_id.clone());
                report.files_failed = files_failed;
                report
            }
        }
    }

    async fn maybe_enhance(&self, parsed: Vec<ParsedSource>) -> Vec<ParsedSource> {
        if !self.settings.indexing.enable_lsp || parsed.is_empty() {
            return parsed;
        }

        match enhance_batched(
            &self.enhancer,
            &self.executor,
            &self.enhance_options(),
            parsed.clone(),
        )
        .await
        {
            Ok(enhanced) => enhanced,
            Err(e) => {
                tracing::warn!(
                    target: "indexing",
                    "enhancement batch failed, continuing unenhanced: {e}"
                );
                parsed
            }
        }
    }

    fn report_from_outcome(
        project_id: ProjectId,
        outcome: PipelineOutcome<IndexContext>,
    ) -> IndexReport {
        let ctx = outcome.context;

        let mut errors: Vec<String> = outcome
            .stages
            .iter()
            .filter(|stage| !stage.success)
            .filter_map(|stage| {
                stage
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {e}", stage.name))
            })
            .collect();
        if let Some(store_outcome) = &ctx.store_outcome {
            errors.extend(store_outcome.errors.iter().cloned());
        }

        IndexReport {
            success: outcome.success,
            project_id: Some(project_id),
            files_processed: ctx.parsed.len(),
            files_failed: ctx.files_failed,
            chunks_stored: ctx
                .store_outcome
                .as_ref()
                .map(|o| o.chunks_stored)
                .unwrap_or(0),
            errors,
            elapsed: outcome.elapsed,
        }
    }
}

impl std::fmt::Debug for IndexOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOrchestrator")
            .field("active", &self.active.len())
            .finish()
    }
}
