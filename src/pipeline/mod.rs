//! Staged pipeline runner.
//!
//! Executes an ordered list of named stages over a typed context, folding
//! each stage's output into the input of the next. Every stage carries its
//! own timeout, retry, and continue-on-error policy; failures are recorded
//! in the run outcome instead of escaping as errors.
//!
//! ```text
//! memory-gate → traversal → batch-parse → enhance → store
//!      │            │            │           │        │
//!      ▼            ▼            ▼           ▼        ▼
//!   [gate]      [file list]  [snippets]  [symbols]  storage
//! ```
//!
//! The context is cloned before every attempt, so a failed stage leaves the
//! running context exactly as the previous stage produced it.

pub mod metrics;

pub use metrics::{MetricsSnapshot, PipelineMetrics, StageAggregate};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error raised by a stage attempt.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("stage timed out after {0:?}")]
    Timeout(Duration),
}

impl From<String> for StageError {
    fn from(msg: String) -> Self {
        Self::Failed(msg)
    }
}

impl From<&str> for StageError {
    fn from(msg: &str) -> Self {
        Self::Failed(msg.to_string())
    }
}

/// One named, independently timed and retried unit of pipeline work.
#[async_trait]
pub trait Stage<C>: Send + Sync {
    fn name(&self) -> &str;

    /// Transform the context. Returning an error triggers the stage's
    /// retry policy; the engine passes a fresh clone on each attempt.
    async fn run(&self, ctx: C) -> Result<C, StageError>;
}

/// Adapter turning an async closure into a [`Stage`].
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<C, F, Fut> Stage<C> for FnStage<F>
where
    C: Send + 'static,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C, StageError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: C) -> Result<C, StageError> {
        (self.f)(ctx).await
    }
}

/// Per-stage execution policy.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    /// Wall-clock bound per attempt. `None` disables the timeout race.
    pub timeout: Option<Duration>,
    /// Additional attempts after the first failure.
    pub retry_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
    /// Keep running later stages when this one exhausts its retries.
    pub continue_on_error: bool,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry_attempts: 0,
            retry_delay: Duration::from_millis(200),
            continue_on_error: false,
        }
    }
}

impl StagePolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

/// Outcome of one stage across all of its attempts.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Retries actually used (0 means the first attempt succeeded).
    pub retries: u32,
    pub error: Option<String>,
}

/// Outcome of a full pipeline run.
///
/// Ordinary stage failures land here; `execute` itself never fails.
#[derive(Debug, Clone)]
pub struct PipelineOutcome<C> {
    pub success: bool,
    /// Context as of the last successfully completed stage.
    pub context: C,
    pub elapsed: Duration,
    pub stages: Vec<StageReport>,
    /// Error of the stage that aborted the run, if any.
    pub error: Option<String>,
}

/// Ordered stage runner over a cloneable context.
pub struct Pipeline<C> {
    stages: Vec<(Arc<dyn Stage<C>>, StagePolicy)>,
    metrics: Arc<PipelineMetrics>,
}

impl<C: Clone + Send + 'static> Pipeline<C> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Share a cumulative metrics collector across pipeline instances.
    pub fn with_metrics(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            stages: Vec::new(),
            metrics,
        }
    }

    /// Append a stage with its policy. Stages execute in insertion order.
    pub fn add_stage(mut self, stage: impl Stage<C> + 'static, policy: StagePolicy) -> Self {
        self.stages.push((Arc::new(stage), policy));
        self
    }

    pub fn clear_stages(&mut self) {
        self.stages.clear();
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run all stages strictly in order over `initial`.
    pub async fn execute(&self, initial: C) -> PipelineOutcome<C> {
        let run_start = Instant::now();
        let mut ctx = initial;
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut run_error = None;

        for (stage, policy) in &self.stages {
            let report = self.run_stage(stage.as_ref(), policy, &mut ctx).await;
            let failed = !report.success;
            let error = report.error.clone();
            reports.push(report);

            if failed && !policy.continue_on_error {
                run_error = error;
                break;
            }
        }

        let outcome = PipelineOutcome {
            success: run_error.is_none(),
            context: ctx,
            elapsed: run_start.elapsed(),
            stages: reports,
            error: run_error,
        };
        self.metrics.record_run(&outcome.stages, outcome.success, outcome.elapsed);
        outcome
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage<C>,
        policy: &StagePolicy,
        ctx: &mut C,
    ) -> StageReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=policy.retry_attempts {
            if attempt > 0 {
                // Linear backoff: delay grows with the attempt number.
                tokio::time::sleep(policy.retry_delay * attempt).await;
                tracing::debug!(
                    target: "pipeline",
                    "retrying stage '{}' (attempt {}/{})",
                    stage.name(),
                    attempt + 1,
                    policy.retry_attempts + 1
                );
            }

            let attempt_ctx = ctx.clone();
            let result = match policy.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, stage.run(attempt_ctx)).await
                {
                    Ok(res) => res,
                    Err(_) => Err(StageError::Timeout(timeout)),
                },
                None => stage.run(attempt_ctx).await,
            };

            match result {
                Ok(next) => {
                    *ctx = next;
                    return StageReport {
                        name: stage.name().to_string(),
                        success: true,
                        started_at,
                        duration: start.elapsed(),
                        retries: attempt,
                        error: None,
                    };
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        tracing::warn!(
            target: "pipeline",
            "stage '{}' failed after {} attempts: {last_error}",
            stage.name(),
            policy.retry_attempts + 1
        );

        StageReport {
            name: stage.name().to_string(),
            success: false,
            started_at,
            duration: start.elapsed(),
            retries: policy.retry_attempts,
            error: Some(last_error),
        }
    }
}

impl<C: Clone + Send + 'static> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}
