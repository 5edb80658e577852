//! Bounded-concurrency batch executor.
//!
//! Partitions a work list into fixed-size chunks and drives them through a
//! processor with a bounded number of in-flight tasks. Admission of each
//! task is gated on memory pressure; failed tasks retry with a fixed delay;
//! a finished batch reports per-task results, throughput, and a memory
//! footprint.
//!
//! Completion order among in-flight tasks is deliberately unspecified: the
//! first task to finish frees the next admission slot. Only the admission
//! order follows the caller's chunk order. Turning this into FIFO would
//! serialize slow tasks behind fast ones and cost throughput.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::BatchConfig;
use crate::memory::MemoryMonitor;

/// Error type produced by batch task processors.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Admission was refused even after the reclaim escalation and the
    /// batch was configured to abort rather than skip.
    #[error("memory usage above {threshold:.1}% after reclaim; batch aborted")]
    MemoryThresholdExceeded { threshold: f64 },

    /// A task exhausted its retries and the batch was configured to abort.
    #[error("task {index} failed after {attempts} attempts: {reason}")]
    TaskFailed {
        index: usize,
        attempts: u32,
        reason: String,
    },
}

/// Execution options for one `process` call.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items handed to one processor invocation.
    pub batch_size: usize,
    /// Upper bound on concurrently in-flight tasks.
    pub max_concurrency: usize,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Memory usage percent above which tasks are not admitted.
    pub memory_threshold: f64,
    /// Record failures and keep going instead of aborting the run.
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrency: config.max_concurrency.max(1),
            timeout: config.task_timeout(),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay(),
            memory_threshold: config.memory_threshold_percent,
            continue_on_error: config.continue_on_error,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_memory_threshold(mut self, percent: f64) -> Self {
        self.memory_threshold = percent;
        self
    }

    pub fn abort_on_error(mut self) -> Self {
        self.continue_on_error = false;
        self
    }
}

/// Outcome of one task (one chunk) across all of its attempts.
#[derive(Debug)]
pub struct TaskReport<R> {
    /// Position of this chunk in admission order.
    pub batch_index: usize,
    /// Number of items in the chunk.
    pub items: usize,
    pub success: bool,
    pub duration: Duration,
    /// Retries actually used (0 means the first attempt succeeded).
    pub retries: u32,
    pub error: Option<String>,
    pub output: Option<R>,
}

/// Memory usage over the lifetime of one batch run, sampled
/// opportunistically at admissions and completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFootprint {
    pub start_bytes: u64,
    pub end_bytes: u64,
    pub peak_bytes: u64,
}

/// Outcome of one `process` call.
#[derive(Debug)]
pub struct BatchReport<R> {
    pub batch_id: String,
    /// Per-task results in admission order.
    pub tasks: Vec<TaskReport<R>>,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub elapsed: Duration,
    /// Successful items per elapsed second.
    pub throughput: f64,
    pub memory: MemoryFootprint,
}

impl<R> BatchReport<R> {
    pub fn successful_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.success).count()
    }

    pub fn failed_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.success).count()
    }

    /// Errors of all failed tasks.
    pub fn errors(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter_map(|t| t.error.clone())
            .collect()
    }

    /// Consume the report, yielding successful outputs in admission order.
    pub fn into_outputs(self) -> Vec<R> {
        self.tasks.into_iter().filter_map(|t| t.output).collect()
    }
}

struct TaskOutcome<R> {
    result: Result<R, String>,
    duration: Duration,
    retries: u32,
}

/// Concurrency-bounded, memory-gated batch runner.
pub struct BatchExecutor {
    monitor: Arc<MemoryMonitor>,
    batch_counter: AtomicU64,
}

impl BatchExecutor {
    pub fn new(monitor: Arc<MemoryMonitor>) -> Self {
        Self {
            monitor,
            batch_counter: AtomicU64::new(0),
        }
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    /// Drive `items` through `processor` in chunks of `batch_size`.
    ///
    /// The processor is invoked once per chunk, `ceil(items / batch_size)`
    /// times in total. At most `max_concurrency` invocations are in flight
    /// at any instant; each admission first passes the memory gate
    /// (check, reclaim, re-check once).
    ///
    /// Returns `Err` only when the run aborts (`continue_on_error = false`
    /// and a task fails or admission is refused). Per-task failures are
    /// otherwise recorded in the report.
    pub async fn process<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
        options: &BatchOptions,
    ) -> Result<BatchReport<R>, BatchError>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let batch_id = format!(
            "batch-{}",
            self.batch_counter.fetch_add(1, Ordering::Relaxed)
        );
        let start = Instant::now();
        let total_items = items.len();

        let start_bytes = self.monitor.sample().used_bytes;
        let mut peak_bytes = start_bytes;

        let mut pending: VecDeque<(usize, Vec<T>)> = partition(items, options.batch_size)
            .into_iter()
            .enumerate()
            .collect();
        let total_tasks = pending.len();

        tracing::debug!(
            target: "batch",
            "{batch_id}: {total_items} items in {total_tasks} tasks, window {}",
            options.max_concurrency
        );

        let mut in_flight: JoinSet<(usize, TaskOutcome<R>)> = JoinSet::new();
        let mut task_meta: HashMap<tokio::task::Id, (usize, usize)> = HashMap::new();
        let mut reports: Vec<TaskReport<R>> = Vec::with_capacity(total_tasks);

        loop {
            // Admission: fill the concurrency window from the pending queue.
            while in_flight.len() < options.max_concurrency && !pending.is_empty() {
                if !self.monitor.admit(options.memory_threshold) {
                    let (index, chunk) = pending.pop_front().expect("pending checked non-empty");
                    if options.continue_on_error {
                        tracing::warn!(
                            target: "batch",
                            "{batch_id}: task {index} skipped, memory above {:.1}%",
                            options.memory_threshold
                        );
                        reports.push(TaskReport {
                            batch_index: index,
                            items: chunk.len(),
                            success: false,
                            duration: Duration::ZERO,
                            retries: 0,
                            error: Some(format!(
                                "memory threshold {:.1}% exceeded",
                                options.memory_threshold
                            )),
                            output: None,
                        });
                        continue;
                    }
                    in_flight.abort_all();
                    return Err(BatchError::MemoryThresholdExceeded {
                        threshold: options.memory_threshold,
                    });
                }

                let (index, chunk) = pending.pop_front().expect("pending checked non-empty");
                let item_count = chunk.len();
                let processor = processor.clone();
                let opts = options.clone();
                let handle = in_flight.spawn(async move {
                    let outcome = run_task(chunk, processor, &opts).await;
                    (index, outcome)
                });
                task_meta.insert(handle.id(), (index, item_count));
            }

            if in_flight.is_empty() {
                break;
            }

            // First-completion race: whichever in-flight task finishes
            // first frees the next admission slot.
            match in_flight.join_next_with_id().await {
                Some(Ok((id, (index, outcome)))) => {
                    let (_, item_count) = task_meta.remove(&id).unwrap_or((index, 0));
                    let sampled = self.monitor.sample().used_bytes;
                    peak_bytes = peak_bytes.max(sampled);

                    match outcome.result {
                        Ok(output) => reports.push(TaskReport {
                            batch_index: index,
                            items: item_count,
                            success: true,
                            duration: outcome.duration,
                            retries: outcome.retries,
                            error: None,
                            output: Some(output),
                        }),
                        Err(reason) => {
                            if !options.continue_on_error {
                                in_flight.abort_all();
                                return Err(BatchError::TaskFailed {
                                    index,
                                    attempts: options.retry_attempts + 1,
                                    reason,
                                });
                            }
                            reports.push(TaskReport {
                                batch_index: index,
                                items: item_count,
                                success: false,
                                duration: outcome.duration,
                                retries: outcome.retries,
                                error: Some(reason),
                                output: None,
                            });
                        }
                    }
                }
                Some(Err(join_err)) => {
                    let (index, item_count) =
                        task_meta.remove(&join_err.id()).unwrap_or((usize::MAX, 0));
                    if !options.continue_on_error {
                        in_flight.abort_all();
                        return Err(BatchError::TaskFailed {
                            index,
                            attempts: 1,
                            reason: join_err.to_string(),
                        });
                    }
                    reports.push(TaskReport {
                        batch_index: index,
                        items: item_count,
                        success: false,
                        duration: Duration::ZERO,
                        retries: 0,
                        error: Some(format!("task panicked: {join_err}")),
                        output: None,
                    });
                }
                None => break,
            }
        }

        reports.sort_by_key(|t| t.batch_index);

        let end_bytes = self.monitor.sample().used_bytes;
        peak_bytes = peak_bytes.max(end_bytes);
        let elapsed = start.elapsed();

        let successful_items: usize = reports.iter().filter(|t| t.success).map(|t| t.items).sum();
        let failed_items = total_items - successful_items;
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            successful_items as f64 / secs
        } else {
            0.0
        };

        tracing::debug!(
            target: "batch",
            "{batch_id}: done, {successful_items}/{total_items} items ok in {elapsed:?} ({throughput:.0}/s)"
        );

        Ok(BatchReport {
            batch_id,
            tasks: reports,
            total_items,
            successful_items,
            failed_items,
            elapsed,
            throughput,
            memory: MemoryFootprint {
                start_bytes,
                end_bytes,
                peak_bytes,
            },
        })
    }
}

/// Split `items` into chunks of at most `batch_size`, preserving order.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(items.len()));

    for item in items {
        current.push(item);
        if current.len() == batch_size {
            chunks.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Run one chunk through the processor with timeout and fixed-delay retries.
async fn run_task<T, R, F, Fut>(chunk: Vec<T>, processor: F, options: &BatchOptions) -> TaskOutcome<R>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<R, TaskError>>,
{
    let start = Instant::now();
    let mut last_error = String::new();

    for attempt in 0..=options.retry_attempts {
        if attempt > 0 {
            tokio::time::sleep(options.retry_delay).await;
        }

        match tokio::time::timeout(options.timeout, processor(chunk.clone())).await {
            Ok(Ok(output)) => {
                return TaskOutcome {
                    result: Ok(output),
                    duration: start.elapsed(),
                    retries: attempt,
                };
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("task timed out after {:?}", options.timeout),
        }
    }

    TaskOutcome {
        result: Err(last_error),
        duration: start.elapsed(),
        retries: options.retry_attempts,
    }
}
