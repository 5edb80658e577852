//! Cumulative pipeline metrics.
//!
//! Tracks execution counts, failure counts, and running average durations
//! across pipeline runs, with per-stage aggregates for bottleneck hunting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::StageReport;

#[derive(Debug, Default, Clone)]
struct StageTotals {
    executions: u64,
    failures: u64,
    total_duration: Duration,
    total_retries: u64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_executions: u64,
    successful_executions: u64,
    failed_executions: u64,
    total_elapsed: Duration,
    stages: HashMap<String, StageTotals>,
}

/// Per-stage aggregate exposed in [`MetricsSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageAggregate {
    pub executions: u64,
    pub failures: u64,
    pub average_duration: Duration,
    pub total_retries: u64,
}

/// Point-in-time view of the cumulative counters.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_execution_time: Duration,
    pub stages: HashMap<String, StageAggregate>,
}

/// Process-wide pipeline counters, shared via `Arc` and accumulated
/// across every `execute` call.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    inner: Mutex<MetricsInner>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished run into the cumulative counters.
    pub fn record_run(&self, stages: &[StageReport], success: bool, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.total_executions += 1;
        if success {
            inner.successful_executions += 1;
        } else {
            inner.failed_executions += 1;
        }
        inner.total_elapsed += elapsed;

        for report in stages {
            let totals = inner.stages.entry(report.name.clone()).or_default();
            totals.executions += 1;
            if !report.success {
                totals.failures += 1;
            }
            totals.total_duration += report.duration;
            totals.total_retries += u64::from(report.retries);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let average_execution_time = if inner.total_executions > 0 {
            inner.total_elapsed / inner.total_executions as u32
        } else {
            Duration::ZERO
        };

        let stages = inner
            .stages
            .iter()
            .map(|(name, totals)| {
                let average_duration = if totals.executions > 0 {
                    totals.total_duration / totals.executions as u32
                } else {
                    Duration::ZERO
                };
                (
                    name.clone(),
                    StageAggregate {
                        executions: totals.executions,
                        failures: totals.failures,
                        average_duration,
                        total_retries: totals.total_retries,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_executions: inner.total_executions,
            successful_executions: inner.successful_executions,
            failed_executions: inner.failed_executions,
            average_execution_time,
            stages,
        }
    }

    /// Log a one-line summary per stage.
    pub fn log(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "pipeline",
            "runs: {} total, {} ok, {} failed, avg {:?}",
            snapshot.total_executions,
            snapshot.successful_executions,
            snapshot.failed_executions,
            snapshot.average_execution_time
        );
        for (name, stage) in &snapshot.stages {
            tracing::info!(
                target: "pipeline",
                "  {name}: {} runs, {} failures, avg {:?}, {} retries",
                stage.executions,
                stage.failures,
                stage.average_duration,
                stage.total_retries
            );
        }
    }
}
