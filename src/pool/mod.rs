//! Generic reusable-object pool with validation and eviction.
//!
//! Avoids repeated allocation cost for short-lived scratch values (read
//! buffers, parse scratch space) drawn during batch processing. Items are
//! validated on the way in and out; items beyond capacity are evicted
//! according to the configured policy and destroyed.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Rule for discarding idle items beyond capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict the least-recently-used idle item.
    #[default]
    Lru,
    /// Evict the item that has been idle the longest since insertion.
    Fifo,
}

impl EvictionPolicy {
    /// Parse from configuration text; unknown values fall back to LRU.
    pub fn from_config(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Self::Fifo,
            _ => Self::Lru,
        }
    }
}

/// Pool sizing and eviction configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Items created up front.
    pub initial_size: usize,
    /// Maximum idle items retained.
    pub max_size: usize,
    pub eviction_policy: EvictionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            max_size: 16,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

/// Lifetime counters exposed by `ResourcePool::stats`.
///
/// Invariant: `total_acquired - total_released == active_items` and
/// `available_items <= max_size` after every operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_destroyed: u64,
    pub active_items: usize,
    pub available_items: usize,
}

type Creator<T> = Box<dyn Fn() -> T + Send + Sync>;
type Resetter<T> = Box<dyn Fn(&mut T) + Send + Sync>;
type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Destroyer<T> = Box<dyn Fn(T) + Send + Sync>;

struct PoolInner<T> {
    idle: VecDeque<T>,
    acquired: u64,
    released: u64,
    destroyed: u64,
    active: usize,
}

/// Generic reusable-object cache.
///
/// `acquire` never blocks: it hands out a validated idle item or creates a
/// new one on demand. `release` resets and revalidates the item before
/// returning it to the idle set.
pub struct ResourcePool<T> {
    inner: Mutex<PoolInner<T>>,
    creator: Creator<T>,
    resetter: Option<Resetter<T>>,
    validator: Option<Validator<T>>,
    destroyer: Option<Destroyer<T>>,
    config: PoolConfig,
}

impl<T: Send> ResourcePool<T> {
    /// Start building a pool around a creator function.
    pub fn builder(creator: impl Fn() -> T + Send + Sync + 'static) -> PoolBuilder<T> {
        PoolBuilder {
            creator: Box::new(creator),
            resetter: None,
            validator: None,
            destroyer: None,
            config: PoolConfig::default(),
        }
    }

    /// Take an item from the pool, creating one if none are idle.
    pub fn acquire(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            // Hot items live at the back of the idle queue.
            let candidate = match self.config.eviction_policy {
                EvictionPolicy::Lru => inner.idle.pop_back(),
                EvictionPolicy::Fifo => inner.idle.pop_front(),
            };

            match candidate {
                Some(item) => {
                    if self.is_valid(&item) {
                        inner.acquired += 1;
                        inner.active += 1;
                        return item;
                    }
                    inner.destroyed += 1;
                    drop(inner);
                    self.destroy(item);
                    inner = self.inner.lock();
                }
                None => {
                    inner.acquired += 1;
                    inner.active += 1;
                    drop(inner);
                    return (self.creator)();
                }
            }
        }
    }

    /// Return an item to the pool.
    ///
    /// The item is reset, then validated; items failing validation are
    /// destroyed. When the idle set is at capacity, the eviction policy
    /// picks a victim to destroy before the returned item is admitted.
    pub fn release(&self, mut item: T) {
        if let Some(resetter) = &self.resetter {
            resetter(&mut item);
        }

        let mut inner = self.inner.lock();
        inner.released += 1;
        inner.active = inner.active.saturating_sub(1);

        if !self.is_valid(&item) {
            inner.destroyed += 1;
            drop(inner);
            self.destroy(item);
            return;
        }

        let mut evicted = None;
        if inner.idle.len() >= self.config.max_size {
            // Coldest items live at the front regardless of policy.
            evicted = inner.idle.pop_front();
            inner.destroyed += 1;
        }
        inner.idle.push_back(item);
        drop(inner);

        if let Some(victim) = evicted {
            self.destroy(victim);
        }
    }

    /// Destroy all idle items, returning how many were dropped.
    ///
    /// Registered as a reclaim hook with the memory monitor.
    pub fn shrink_idle(&self) -> usize {
        let mut inner = self.inner.lock();
        let drained: Vec<T> = inner.idle.drain(..).collect();
        inner.destroyed += drained.len() as u64;
        drop(inner);

        let count = drained.len();
        for item in drained {
            self.destroy(item);
        }
        if count > 0 {
            tracing::debug!(target: "pool", "shrunk idle set, destroyed {count} items");
        }
        count
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            total_acquired: inner.acquired,
            total_released: inner.released,
            total_destroyed: inner.destroyed,
            active_items: inner.active,
            available_items: inner.idle.len(),
        }
    }

    fn is_valid(&self, item: &T) -> bool {
        self.validator.as_ref().is_none_or(|v| v(item))
    }

    fn destroy(&self, item: T) {
        match &self.destroyer {
            Some(d) => d(item),
            None => drop(item),
        }
    }
}

/// Builder for [`ResourcePool`].
pub struct PoolBuilder<T> {
    creator: Creator<T>,
    resetter: Option<Resetter<T>>,
    validator: Option<Validator<T>>,
    destroyer: Option<Destroyer<T>>,
    config: PoolConfig,
}

impl<T: Send> PoolBuilder<T> {
    /// Run on every release, before validation.
    pub fn with_resetter(mut self, resetter: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.resetter = Some(Box::new(resetter));
        self
    }

    /// Items failing validation are destroyed instead of pooled.
    pub fn with_validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Run on every destroyed item (eviction, invalidation, shrink).
    pub fn with_destroyer(mut self, destroyer: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.destroyer = Some(Box::new(destroyer));
        self
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pool, pre-warming it with `initial_size` items.
    pub fn build(self) -> ResourcePool<T> {
        let initial = self.config.initial_size.min(self.config.max_size);
        let idle: VecDeque<T> = (0..initial).map(|_| (self.creator)()).collect();

        ResourcePool {
            inner: Mutex::new(PoolInner {
                idle,
                acquired: 0,
                released: 0,
                destroyed: 0,
                active: 0,
            }),
            creator: self.creator,
            resetter: self.resetter,
            validator: self.validator,
            destroyer: self.destroyer,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_invariant(stats: &PoolStats) {
        assert_eq!(
            stats.total_acquired - stats.total_released,
            stats.active_items as u64
        );
    }

    #[test]
    fn test_prewarm_and_acquire() {
        let pool = ResourcePool::builder(|| Vec::<u8>::with_capacity(64))
            .with_config(PoolConfig {
                initial_size: 3,
                max_size: 8,
                eviction_policy: EvictionPolicy::Lru,
            })
            .build();

        assert_eq!(pool.stats().available_items, 3);

        let buf = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.total_acquired, 1);
        assert_eq!(stats.active_items, 1);
        assert_eq!(stats.available_items, 2);
        counter_invariant(&stats);

        pool.release(buf);
        let stats = pool.stats();
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.active_items, 0);
        assert_eq!(stats.available_items, 3);
        counter_invariant(&stats);
    }

    #[test]
    fn test_creates_on_demand_without_blocking() {
        let pool = ResourcePool::builder(String::new)
            .with_config(PoolConfig {
                initial_size: 0,
                max_size: 2,
                eviction_policy: EvictionPolicy::Lru,
            })
            .build();

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.total_acquired, 3);
        assert_eq!(stats.active_items, 3);
        counter_invariant(&stats);

        pool.release(a);
        pool.release(b);
        pool.release(c);
        let stats = pool.stats();
        // Capacity is 2, so one release triggered an eviction.
        assert_eq!(stats.available_items, 2);
        assert_eq!(stats.total_destroyed, 1);
        counter_invariant(&stats);
    }

    #[test]
    fn test_invalid_items_destroyed_on_release() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let destroyed_clone = Arc::clone(&destroyed);

        let pool = ResourcePool::builder(|| Vec::<u8>::new())
            .with_validator(|buf: &Vec<u8>| buf.capacity() <= 1024)
            .with_destroyer(move |_| {
                destroyed_clone.fetch_add(1, Ordering::SeqCst);
            })
            .with_config(PoolConfig {
                initial_size: 0,
                max_size: 4,
                eviction_policy: EvictionPolicy::Lru,
            })
            .build();

        let mut buf = pool.acquire();
        buf.reserve(4096); // now fails validation
        pool.release(buf);

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.available_items, 0);
        assert_eq!(stats.total_destroyed, 1);
        counter_invariant(&stats);
    }

    #[test]
    fn test_resetter_runs_before_reuse() {
        let pool = ResourcePool::builder(Vec::new)
            .with_resetter(|buf: &mut Vec<u8>| buf.clear())
            .with_config(PoolConfig {
                initial_size: 1,
                max_size: 4,
                eviction_policy: EvictionPolicy::Lru,
            })
            .build();

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"scratch");
        pool.release(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        pool.release(buf);
    }

    #[test]
    fn test_shrink_idle() {
        let pool = ResourcePool::builder(|| 0u64)
            .with_config(PoolConfig {
                initial_size: 5,
                max_size: 8,
                eviction_policy: EvictionPolicy::Fifo,
            })
            .build();

        assert_eq!(pool.shrink_idle(), 5);
        let stats = pool.stats();
        assert_eq!(stats.available_items, 0);
        assert_eq!(stats.total_destroyed, 5);
    }

    #[test]
    fn test_invariant_after_mixed_sequence() {
        let pool = ResourcePool::builder(|| Vec::<u8>::new())
            .with_config(PoolConfig {
                initial_size: 2,
                max_size: 3,
                eviction_policy: EvictionPolicy::Lru,
            })
            .build();

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        let d = pool.acquire();
        pool.release(b);
        pool.release(c);
        pool.release(d);
        pool.acquire();

        let stats = pool.stats();
        counter_invariant(&stats);
        assert!(stats.available_items <= 3);
    }
}
