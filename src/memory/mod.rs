//! Process memory monitoring and admission control.
//!
//! A background sampler classifies memory usage against configured
//! thresholds, notifies observers, and keeps running statistics. Callers
//! gating new work use [`MemoryMonitor::check_memory`] directly, or
//! [`MemoryMonitor::admit`] for the fixed two-step escalation
//! (check, reclaim, re-check once).
//!
//! There is no garbage collector to force in this runtime; instead the
//! monitor invokes registered reclaim hooks (pool shrinkers, cache
//! clearers) and reports whether any of them released something.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;

use crate::config::MemoryConfig;

/// Usage percentages at which status degrades. Must be strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryThresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl MemoryThresholds {
    pub fn new(warning: f64, critical: f64, emergency: f64) -> Result<Self, MemoryError> {
        let t = Self {
            warning,
            critical,
            emergency,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.warning < self.critical && self.critical < self.emergency {
            Ok(())
        } else {
            Err(MemoryError::InvalidThresholds {
                warning: self.warning,
                critical: self.critical,
                emergency: self.emergency,
            })
        }
    }
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            emergency: 95.0,
        }
    }
}

impl TryFrom<&MemoryConfig> for MemoryThresholds {
    type Error = MemoryError;

    fn try_from(config: &MemoryConfig) -> Result<Self, MemoryError> {
        Self::new(
            config.warning_percent,
            config.critical_percent,
            config.emergency_percent,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(
        "memory thresholds must be strictly increasing, got warning={warning} critical={critical} emergency={emergency}"
    )]
    InvalidThresholds {
        warning: f64,
        critical: f64,
        emergency: f64,
    },
}

/// Classified health level, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryLevel {
    Healthy,
    Warning,
    Critical,
    Emergency,
}

impl MemoryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// Point-in-time memory usage.
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    /// Process resident set size in bytes.
    pub used_bytes: u64,
    /// Total system memory in bytes.
    pub total_bytes: u64,
    pub percent_used: f64,
    pub timestamp: DateTime<Utc>,
}

impl MemorySample {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        let percent_used = if total_bytes > 0 {
            (used_bytes as f64 / total_bytes as f64) * 100.0
        } else {
            0.0
        };
        Self {
            used_bytes,
            total_bytes,
            percent_used,
            timestamp: Utc::now(),
        }
    }

    /// Sample the current process via sysinfo.
    pub fn current() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let used = sys.process(pid).map(|p| p.memory()).unwrap_or(0);
        Self::new(used, sys.total_memory())
    }
}

/// Classified health derived from the latest sample.
#[derive(Debug, Clone)]
pub struct MemoryStatus {
    pub level: MemoryLevel,
    pub sample: MemorySample,
    pub recommendations: Vec<String>,
}

/// Running statistics accumulated by the sampler.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub samples: u64,
    pub average_percent: f64,
    pub peak_percent: f64,
    pub peak_bytes: u64,
}

type Observer = Box<dyn Fn(&MemoryStatus) + Send + Sync>;
type ReclaimHook = Box<dyn Fn() -> bool + Send + Sync>;
type Probe = Box<dyn Fn() -> MemorySample + Send + Sync>;

/// Periodic memory sampler with threshold classification and admission gating.
pub struct MemoryMonitor {
    thresholds: MemoryThresholds,
    check_interval: Duration,
    /// Usage percent at which a sampler tick proactively runs reclaim
    /// hooks instead of waiting for an admission failure.
    reclaim_threshold: Option<f64>,
    probe: Probe,
    observers: Mutex<Vec<Observer>>,
    reclaimers: Mutex<Vec<ReclaimHook>>,
    stats: Mutex<MemoryStats>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MemoryMonitor {
    pub fn new(thresholds: MemoryThresholds, check_interval: Duration) -> Self {
        Self {
            thresholds,
            check_interval,
            reclaim_threshold: None,
            probe: Box::new(MemorySample::current),
            observers: Mutex::new(Vec::new()),
            reclaimers: Mutex::new(Vec::new()),
            stats: Mutex::new(MemoryStats::default()),
            cancel: Mutex::new(None),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let mut monitor = Self::new(
            MemoryThresholds::try_from(config)?,
            config.check_interval(),
        );
        monitor.reclaim_threshold = Some(config.gc_threshold_percent);
        Ok(monitor)
    }

    /// Run reclaim hooks from sampler ticks once usage passes `percent`.
    pub fn with_reclaim_threshold(mut self, percent: f64) -> Self {
        self.reclaim_threshold = Some(percent);
        self
    }

    /// Replace the sampling probe. Tests inject fixed samples here.
    pub fn with_probe(mut self, probe: impl Fn() -> MemorySample + Send + Sync + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        self.thresholds
    }

    /// Register a callback invoked with every classified sample.
    pub fn add_observer(&self, observer: impl Fn(&MemoryStatus) + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(observer));
    }

    /// Register a hook that tries to release memory; returns whether it did.
    pub fn add_reclaimer(&self, hook: impl Fn() -> bool + Send + Sync + 'static) {
        self.reclaimers.lock().push(Box::new(hook));
    }

    /// Take one raw sample without classification.
    pub fn sample(&self) -> MemorySample {
        (self.probe)()
    }

    /// Take one sample and classify it.
    pub fn status(&self) -> MemoryStatus {
        let sample = (self.probe)();
        self.classify(sample)
    }

    /// Synchronous point check: is usage below `threshold_percent`?
    pub fn check_memory(&self, threshold_percent: f64) -> bool {
        (self.probe)().percent_used < threshold_percent
    }

    /// Run registered reclaim hooks; true if any reported releasing memory.
    pub fn try_reclaim(&self) -> bool {
        let reclaimers = self.reclaimers.lock();
        let mut reclaimed = false;
        for hook in reclaimers.iter() {
            if hook() {
                reclaimed = true;
            }
        }
        if reclaimed {
            tracing::debug!(target: "memory", "reclaim hooks released memory");
        }
        reclaimed
    }

    /// Fixed two-step admission escalation: check, reclaim, re-check once.
    pub fn admit(&self, threshold_percent: f64) -> bool {
        if self.check_memory(threshold_percent) {
            return true;
        }
        tracing::warn!(
            target: "memory",
            "usage above {threshold_percent:.1}%, running reclaim hooks before re-check"
        );
        self.try_reclaim();
        self.check_memory(threshold_percent)
    }

    /// Running statistics snapshot.
    pub fn stats(&self) -> MemoryStats {
        *self.stats.lock()
    }

    /// Start the background sampler. Idempotent while running.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut cancel_slot = self.cancel.lock();
        if cancel_slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *cancel_slot = Some(token.clone());
        drop(cancel_slot);

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => monitor.tick(),
                }
            }
            tracing::debug!(target: "memory", "monitor stopped");
        });
    }

    /// Stop the background sampler.
    pub fn stop_monitoring(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// One sampling cycle: classify, update stats, notify observers.
    fn tick(&self) {
        let status = self.status();
        self.record(&status.sample);

        if status.level >= MemoryLevel::Warning {
            tracing::warn!(
                target: "memory",
                "memory {} at {:.1}%",
                status.level.as_str(),
                status.sample.percent_used
            );
        }

        if let Some(threshold) = self.reclaim_threshold
            && status.sample.percent_used >= threshold
        {
            self.try_reclaim();
        }

        let observers = self.observers.lock();
        for observer in observers.iter() {
            observer(&status);
        }
    }

    fn record(&self, sample: &MemorySample) {
        let mut stats = self.stats.lock();
        stats.samples += 1;
        // Running average over all samples so far.
        stats.average_percent +=
            (sample.percent_used - stats.average_percent) / stats.samples as f64;
        if sample.percent_used > stats.peak_percent {
            stats.peak_percent = sample.percent_used;
        }
        if sample.used_bytes > stats.peak_bytes {
            stats.peak_bytes = sample.used_bytes;
        }
    }

    fn classify(&self, sample: MemorySample) -> MemoryStatus {
        let percent = sample.percent_used;
        let level = if percent >= self.thresholds.emergency {
            MemoryLevel::Emergency
        } else if percent >= self.thresholds.critical {
            MemoryLevel::Critical
        } else if percent >= self.thresholds.warning {
            MemoryLevel::Warning
        } else {
            MemoryLevel::Healthy
        };

        let mut recommendations = Vec::new();
        match level {
            MemoryLevel::Healthy => {}
            MemoryLevel::Warning => {
                recommendations
                    .push("Consider reducing batch size for subsequent operations".to_string());
            }
            MemoryLevel::Critical => {
                recommendations.push("Reduce max concurrency until usage drops".to_string());
                recommendations.push("Run reclaim hooks to release idle resources".to_string());
            }
            MemoryLevel::Emergency => {
                recommendations.push("Stop admitting new work immediately".to_string());
                recommendations
                    .push("Release idle pools and caches before continuing".to_string());
            }
        }

        MemoryStatus {
            level,
            sample,
            recommendations,
        }
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("thresholds", &self.thresholds)
            .field("check_interval", &self.check_interval)
            .field("observers", &self.observers.lock().len())
            .field("reclaimers", &self.reclaimers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn fixed_monitor(percent: f64) -> MemoryMonitor {
        MemoryMonitor::new(MemoryThresholds::default(), Duration::from_millis(10))
            .with_probe(move || MemorySample::new((percent * 100.0) as u64, 10_000))
    }

    #[test]
    fn test_thresholds_must_increase() {
        assert!(MemoryThresholds::new(70.0, 85.0, 95.0).is_ok());
        assert!(MemoryThresholds::new(85.0, 70.0, 95.0).is_err());
        assert!(MemoryThresholds::new(70.0, 70.0, 95.0).is_err());
    }

    #[test]
    fn test_classification_is_monotonic() {
        let cases = [
            (50.0, MemoryLevel::Healthy),
            (77.0, MemoryLevel::Warning),
            (90.0, MemoryLevel::Critical),
            (97.5, MemoryLevel::Emergency),
        ];
        for (percent, expected) in cases {
            let status = fixed_monitor(percent).status();
            assert_eq!(status.level, expected, "at {percent}%");
        }
    }

    #[test]
    fn test_recommendations_only_when_unhealthy() {
        assert!(fixed_monitor(50.0).status().recommendations.is_empty());
        assert!(!fixed_monitor(90.0).status().recommendations.is_empty());
    }

    #[test]
    fn test_check_memory_point_check() {
        let monitor = fixed_monitor(77.0);
        assert!(monitor.check_memory(80.0));
        assert!(!monitor.check_memory(75.0));
    }

    #[test]
    fn test_admit_runs_reclaim_then_rechecks_once() {
        // Probe reports 90% until a reclaim happens, then 50%.
        let reclaimed = Arc::new(AtomicU64::new(0));
        let probe_flag = Arc::clone(&reclaimed);
        let monitor = MemoryMonitor::new(MemoryThresholds::default(), Duration::from_millis(10))
            .with_probe(move || {
                if probe_flag.load(Ordering::SeqCst) > 0 {
                    MemorySample::new(5_000, 10_000)
                } else {
                    MemorySample::new(9_000, 10_000)
                }
            });

        let hook_flag = Arc::clone(&reclaimed);
        monitor.add_reclaimer(move || {
            hook_flag.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(monitor.admit(80.0));
        assert_eq!(reclaimed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_admit_fails_when_reclaim_does_not_help() {
        let monitor = fixed_monitor(97.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        monitor.add_reclaimer(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            false
        });

        assert!(!monitor.admit(80.0));
        // Exactly one escalation, not an unbounded retry.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tick_reclaims_above_gc_threshold() {
        let monitor = fixed_monitor(90.0).with_reclaim_threshold(80.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        monitor.add_reclaimer(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            false
        });

        monitor.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let quiet = fixed_monitor(50.0).with_reclaim_threshold(80.0);
        let quiet_calls = Arc::new(AtomicUsize::new(0));
        let quiet_clone = Arc::clone(&quiet_calls);
        quiet.add_reclaimer(move || {
            quiet_clone.fetch_add(1, Ordering::SeqCst);
            false
        });
        quiet.tick();
        assert_eq!(quiet_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_running_stats() {
        let monitor = fixed_monitor(50.0);
        monitor.tick();
        monitor.tick();
        let stats = monitor.stats();
        assert_eq!(stats.samples, 2);
        assert!((stats.average_percent - 50.0).abs() < 0.01);
        assert!((stats.peak_percent - 50.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_observers_notified_by_sampler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let monitor = Arc::new(fixed_monitor(90.0));
        monitor.add_observer(move |status| {
            assert_eq!(status.level, MemoryLevel::Critical);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop_monitoring();

        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_sysinfo_probe_reports_usage() {
        let sample = MemorySample::current();
        assert!(sample.used_bytes > 0);
        assert!(sample.total_bytes > sample.used_bytes);
    }
}
