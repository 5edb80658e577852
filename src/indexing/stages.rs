//! Pipeline stages for full indexing.
//!
//! Each stage transforms an explicit [`IndexContext`] so the fields a
//! stage requires and produces are visible in one place, rather than
//! accumulating in an untyped bag.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::walker::{FileWalker, TraversalResult};
use crate::batch::{BatchError, BatchExecutor, BatchOptions, TaskError};
use crate::memory::MemoryMonitor;
use crate::parsing::{ParsedSource, SnippetEnhancer, SourceParser};
use crate::pipeline::{Stage, StageError};
use crate::storage::{ArtifactStore, StoreOutcome};
use crate::types::ProjectId;

/// Context threaded through the create-index pipeline.
#[derive(Debug, Clone)]
pub struct IndexContext {
    pub root: PathBuf,
    pub project_id: ProjectId,
    /// Produced by the traversal stage.
    pub traversal: Option<TraversalResult>,
    /// Produced by the parse stage, refined by enhancement.
    pub parsed: Vec<ParsedSource>,
    /// Files that could not be read or parsed.
    pub files_failed: usize,
    /// Produced by the storage stage.
    pub store_outcome: Option<StoreOutcome>,
}

impl IndexContext {
    pub fn new(root: PathBuf, project_id: ProjectId) -> Self {
        Self {
            root,
            project_id,
            traversal: None,
            parsed: Vec::new(),
            files_failed: 0,
            store_outcome: None,
        }
    }
}

/// Admission gate: refuse to start indexing under memory pressure.
pub struct MemoryGateStage {
    monitor: Arc<MemoryMonitor>,
    threshold_percent: f64,
}

impl MemoryGateStage {
    pub fn new(monitor: Arc<MemoryMonitor>, threshold_percent: f64) -> Self {
        Self {
            monitor,
            threshold_percent,
        }
    }
}

#[async_trait]
impl Stage<IndexContext> for MemoryGateStage {
    fn name(&self) -> &str {
        "memory-gate"
    }

    async fn run(&self, ctx: IndexContext) -> Result<IndexContext, StageError> {
        if self.monitor.admit(self.threshold_percent) {
            Ok(ctx)
        } else {
            Err(StageError::Failed(format!(
                "memory usage above {:.1}% even after reclaim",
                self.threshold_percent
            )))
        }
    }
}

/// Discover files to index.
pub struct TraversalStage {
    walker: Arc<FileWalker>,
}

impl TraversalStage {
    pub fn new(walker: Arc<FileWalker>) -> Self {
        Self { walker }
    }
}

#[async_trait]
impl Stage<IndexContext> for TraversalStage {
    fn name(&self) -> &str {
        "traversal"
    }

    async fn run(&self, mut ctx: IndexContext) -> Result<IndexContext, StageError> {
        let walker = Arc::clone(&self.walker);
        let root = ctx.root.clone();
        let result = tokio::task::spawn_blocking(move || walker.traverse(&root))
            .await
            .map_err(|e| StageError::Failed(format!("traversal task failed: {e}")))?;

        ctx.files_failed += result.errors.len();
        ctx.traversal = Some(result);
        Ok(ctx)
    }
}

/// Parse discovered files through the batch executor.
pub struct ParseStage {
    parser: Arc<dyn SourceParser>,
    executor: Arc<BatchExecutor>,
    options: BatchOptions,
}

impl ParseStage {
    pub fn new(
        parser: Arc<dyn SourceParser>,
        executor: Arc<BatchExecutor>,
        options: BatchOptions,
    ) -> Self {
        Self {
            parser,
            executor,
            options,
        }
    }
}

#[async_trait]
impl Stage<IndexContext> for ParseStage {
    fn name(&self) -> &str {
        "batch-parse"
    }

    async fn run(&self, mut ctx: IndexContext) -> Result<IndexContext, StageError> {
        let traversal = ctx
            .traversal
            .as_ref()
            .ok_or_else(|| StageError::from("parse stage requires a traversal result"))?;

        let paths = traversal.file_paths();
        if paths.is_empty() {
            return Ok(ctx);
        }

        let (parsed, failed) = parse_batched(
            &self.parser,
            &self.executor,
            &self.options,
            &ctx.root,
            paths,
        )
        .await
        .map_err(|e| StageError::Failed(e.to_string()))?;

        ctx.files_failed += failed;
        ctx.parsed = parsed;
        Ok(ctx)
    }
}

/// Optional LSP-style enhancement of parsed files.
pub struct EnhanceStage {
    enhancer: Arc<dyn SnippetEnhancer>,
    executor: Arc<BatchExecutor>,
    options: BatchOptions,
}

impl EnhanceStage {
    pub fn new(
        enhancer: Arc<dyn SnippetEnhancer>,
        executor: Arc<BatchExecutor>,
        options: BatchOptions,
    ) -> Self {
        Self {
            enhancer,
            executor,
            options,
        }
    }
}

#[async_trait]
impl Stage<IndexContext> for EnhanceStage {
    fn name(&self) -> &str {
        "enhance"
    }

    async fn run(&self, mut ctx: IndexContext) -> Result<IndexContext, StageError> {
        if ctx.parsed.is_empty() {
            return Ok(ctx);
        }

        let parsed = std::mem::take(&mut ctx.parsed);
        ctx.parsed = enhance_batched(&self.enhancer, &self.executor, &self.options, parsed)
            .await
            .map_err(|e| StageError::Failed(e.to_string()))?;
        Ok(ctx)
    }
}

/// Hand parsed records to the storage collaborator.
pub struct StoreStage {
    store: Arc<dyn ArtifactStore>,
}

impl StoreStage {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage<IndexContext> for StoreStage {
    fn name(&self) -> &str {
        "store"
    }

    async fn run(&self, mut ctx: IndexContext) -> Result<IndexContext, StageError> {
        let outcome = self
            .store
            .store(&ctx.parsed, &ctx.project_id)
            .await
            .map_err(|e| StageError::Failed(format!("storage rejected batch: {e}")))?;

        if !outcome.success {
            return Err(StageError::Failed(format!(
                "storage reported failure: {}",
                outcome.errors.join("; ")
            )));
        }

        ctx.store_outcome = Some(outcome);
        Ok(ctx)
    }
}

/// Parse `paths` in batches; returns parsed entries plus the count of
/// files that failed (whole failed tasks plus per-file parser skips).
pub(crate) async fn parse_batched(
    parser: &Arc<dyn SourceParser>,
    executor: &BatchExecutor,
    options: &BatchOptions,
    root: &Path,
    paths: Vec<PathBuf>,
) -> Result<(Vec<ParsedSource>, usize), BatchError> {
    let parser = Arc::clone(parser);
    let root = root.to_path_buf();

    let report = executor
        .process(
            paths,
            move |chunk: Vec<PathBuf>| {
                let parser = Arc::clone(&parser);
                let root = root.clone();
                async move {
                    Ok::<Vec<ParsedSource>, TaskError>(parser.parse_files(&root, &chunk).await)
                }
            },
            options,
        )
        .await?;

    let attempted = report.successful_items;
    let failed_task_items = report.failed_items;
    let parsed: Vec<ParsedSource> = report.into_outputs().into_iter().flatten().collect();
    let skipped = attempted.saturating_sub(parsed.len());

    Ok((parsed, failed_task_items + skipped))
}

/// Enhance parsed entries in batches. Enhancement failures degrade to the
/// unenhanced entry instead of failing the file.
pub(crate) async fn enhance_batched(
    enhancer: &Arc<dyn SnippetEnhancer>,
    executor: &BatchExecutor,
    options: &BatchOptions,
    parsed: Vec<ParsedSource>,
) -> Result<Vec<ParsedSource>, BatchError> {
    let enhancer = Arc::clone(enhancer);

    let report = executor
        .process(
            parsed,
            move |chunk: Vec<ParsedSource>| {
                let enhancer = Arc::clone(&enhancer);
                async move {
                    let mut out = Vec::with_capacity(chunk.len());
                    for item in chunk {
                        match enhancer.enhance(item.clone()).await {
                            Ok(enhanced) => out.push(enhanced),
                            Err(e) => {
                                tracing::warn!(
                                    target: "indexing",
                                    "enhancement failed for {}: {e}",
                                    item.relative_path.display()
                                );
                                out.push(item);
                            }
                        }
                    }
                    Ok::<Vec<ParsedSource>, TaskError>(out)
                }
            },
            options,
        )
        .await?;

    // A failed enhancement task would silently drop its files; surface it
    // so the pipeline can fall back to the unenhanced context instead.
    if let Some(failed) = report.tasks.iter().find(|t| !t.success) {
        return Err(BatchError::TaskFailed {
            index: failed.batch_index,
            attempts: options.retry_attempts + 1,
            reason: failed
                .error
                .clone()
                .unwrap_or_else(|| "unknown enhancement failure".to_string()),
        });
    }

    Ok(report.into_outputs().into_iter().flatten().collect())
}
