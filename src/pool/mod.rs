//! Two-tier pooling of command buffers.
//!
//! | Tier | Type | Keyed by | Holds |
//! |------|------|----------|-------|
//! | 1 | `BackingPool` | [`PoolKey`] | bundles: a native command pool plus pre-allocated buffers |
//! | 2 | `HandlePool` | [`BorrowKey`] | one registry entry per thread, lending single buffers |
//!
//! A thread's first borrow for a key takes a bundle from tier 1 and parks it in the registry
//! under its own [`BorrowKey`]; later borrows are served from that entry, allocating one more
//! buffer from the entry's pool when it runs dry. Entries go back to tier 1 when they sit idle,
//! when their thread exits, or when the [`Allocator`] is closed.

mod backing;
mod handles;
mod key;
mod liveness;
mod reclaim;
mod registry;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use pumice::vk;

pub use backing::BackingStats;
pub use handles::RecordingHandle;
pub use key::{BorrowKey, PoolKey};

use self::handles::HandlePool;
use crate::{
    device::RawDevice,
    error::{Error, Result},
    tracing::shim_macros::info,
    util::background::BackgroundTask,
};

#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Primary command buffers allocated up front in every bundle.
    pub primary_per_bundle: u32,
    /// Secondary command buffers allocated up front in every bundle.
    pub secondary_per_bundle: u32,
    /// Maximum number of bundles, idle and active, per [`PoolKey`].
    ///
    /// Every borrowing thread holds one bundle per key until its entry is evicted or reclaimed, so
    /// this must be at least the number of threads borrowing concurrently, including the workers
    /// of every [`Submitter`](crate::Submitter) using the allocator. The default covers one
    /// submitter with its default worker count.
    pub backing_pool_size: usize,
    /// How long a borrow waits for a bundle when its key is at capacity.
    pub max_wait: Duration,
    /// Period of the idle sweep, `None` disables it.
    pub eviction_interval: Option<Duration>,
    /// How long an entry or bundle must stay unused before the idle sweep releases it.
    pub min_idle_time: Duration,
    /// Period of the abandoned-entry sweep, `None` disables it.
    pub reclaim_interval: Option<Duration>,
    /// Flags of the command pools the scheduler borrows from.
    pub pool_flags: vk::CommandPoolCreateFlags,
    /// Queue families that may be borrowed for, empty allows any.
    pub queue_families: Vec<u32>,
    /// Log entries that are reclaimed or returned with command buffers still on loan.
    pub leak_diagnostics: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            primary_per_bundle: 4,
            secondary_per_bundle: 0,
            backing_pool_size: default_backing_pool_size(),
            max_wait: Duration::from_secs(5),
            eviction_interval: Some(Duration::from_secs(30)),
            min_idle_time: Duration::from_secs(60),
            reclaim_interval: Some(Duration::from_secs(1)),
            pool_flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_families: Vec::new(),
            leak_diagnostics: cfg!(debug_assertions),
        }
    }
}

// rayon sizes its default pool by the available parallelism too
fn default_backing_pool_size() -> usize {
    thread::available_parallelism()
        .map(|threads| threads.get())
        .unwrap_or(1)
        .max(8)
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backing_pool_size == 0 {
            return Err(Error::validation("backing_pool_size must be at least 1"));
        }
        if self.eviction_interval == Some(Duration::ZERO) {
            return Err(Error::validation("eviction_interval must not be zero"));
        }
        if self.reclaim_interval == Some(Duration::ZERO) {
            return Err(Error::validation("reclaim_interval must not be zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryStats {
    pub available: usize,
    pub loaned: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Registry entries, one per thread and key.
    pub entries: usize,
    pub loaned: usize,
    pub available: usize,
    pub idle_bundles: usize,
    pub active_bundles: usize,
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

struct AllocatorInner {
    pool: Arc<HandlePool>,
    config: AllocatorConfig,
    tasks: Mutex<Vec<BackgroundTask>>,
    /// Borrows hold it shared for their whole duration, closing takes it exclusively.
    closed: RwLock<bool>,
}

impl AllocatorInner {
    fn close(&self) {
        let mut closed = self.closed.write();
        if *closed {
            return;
        }
        *closed = true;

        for mut task in self.tasks.lock().drain(..) {
            task.stop();
        }
        let drained = self.pool.drain();
        self.pool.backing.close();

        info!(
            "Closed command buffer allocator {}, drained {} entries",
            self.pool.id, drained
        );
        drop(closed);
    }
}

impl Drop for AllocatorInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Lends command buffers to any number of threads.
///
/// Cloning is cheap and shares the pools. The allocator is closed by [`Allocator::close`] or when
/// the last clone is dropped; closing stops the background tasks and destroys every native pool,
/// including those with buffers still on loan. A close waits for borrows already in progress,
/// which may themselves wait up to [`AllocatorConfig::max_wait`] for a bundle.
#[derive(Clone)]
pub struct Allocator(Arc<AllocatorInner>);

impl Allocator {
    pub fn new(device: Arc<dyn RawDevice>, config: AllocatorConfig) -> Result<Self> {
        config.validate()?;

        let id = NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::new(HandlePool::new(id, device, &config));

        let mut tasks = Vec::new();
        if let Some(interval) = config.reclaim_interval {
            tasks.push(reclaim::spawn_reclaimer(pool.clone(), interval)?);
        }
        if let Some(interval) = config.eviction_interval {
            tasks.push(reclaim::spawn_evictor(
                pool.clone(),
                interval,
                config.min_idle_time,
            )?);
        }

        Ok(Self(Arc::new(AllocatorInner {
            pool,
            config,
            tasks: Mutex::new(tasks),
            closed: RwLock::new(false),
        })))
    }
    pub fn config(&self) -> &AllocatorConfig {
        &self.0.config
    }
    pub fn device(&self) -> &Arc<dyn RawDevice> {
        self.0.pool.device()
    }
    pub fn is_closed(&self) -> bool {
        *self.0.closed.read()
    }
    fn check_key(&self, key: &PoolKey) -> Result<()> {
        if key.level != vk::CommandBufferLevel::PRIMARY
            && key.level != vk::CommandBufferLevel::SECONDARY
        {
            return Err(Error::validation(format!(
                "{:?} is not a command buffer level",
                key.level
            )));
        }
        let families = &self.0.config.queue_families;
        if !families.is_empty() && !families.contains(&key.queue_family) {
            return Err(Error::validation(format!(
                "queue family {} has no command pools registered",
                key.queue_family
            )));
        }
        Ok(())
    }
    /// Borrows a command buffer for the calling thread.
    ///
    /// A concurrent [`Allocator::close`] waits for the borrow to finish, then drains its entry.
    pub fn borrow(&self, key: PoolKey) -> Result<RecordingHandle> {
        let closed = self.0.closed.read();
        if *closed {
            return Err(Error::validation("the allocator has been closed"));
        }
        self.check_key(&key)?;
        self.0.pool.borrow(key)
    }
    /// Borrows a primary command buffer with the configured pool flags.
    pub fn borrow_primary(&self, queue_family: u32) -> Result<RecordingHandle> {
        self.borrow(PoolKey::primary(queue_family, self.0.config.pool_flags))
    }
    /// Gives a borrowed command buffer back to the entry it came from; works from any thread.
    pub fn give_back(&self, handle: RecordingHandle) -> Result<()> {
        self.0.pool.give_back(handle)
    }
    /// Whether the registry still has an entry for `key`.
    pub fn validate(&self, key: &BorrowKey) -> bool {
        self.0.pool.validate(key)
    }
    pub fn entry_stats(&self, key: &BorrowKey) -> Option<EntryStats> {
        self.0.pool.registry.get(key).map(|entry| EntryStats {
            available: entry.available.len(),
            loaned: entry.loaned,
        })
    }
    pub fn backing_stats(&self, key: &PoolKey) -> BackingStats {
        self.0
            .pool
            .backing
            .stats()
            .get(key)
            .copied()
            .unwrap_or_default()
    }
    pub fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats::default();
        for entry in self.0.pool.registry.snapshot().values() {
            stats.entries += 1;
            stats.loaned += entry.loaned;
            stats.available += entry.available.len();
        }
        for backing in self.0.pool.backing.stats().values() {
            stats.idle_bundles += backing.idle;
            stats.active_bundles += backing.active;
        }
        stats
    }
    /// Runs one abandoned-entry sweep now, returns the number of entries reclaimed.
    pub fn reclaim_abandoned(&self) -> usize {
        self.0.pool.reclaim_abandoned()
    }
    /// Runs one idle sweep now with the configured minimum idle time, returns the number of
    /// registry entries released and native pools destroyed.
    pub fn evict_idle(&self) -> (usize, usize) {
        reclaim::evict_idle(&self.0.pool, self.0.config.min_idle_time)
    }
    pub fn close(&self) {
        self.0.close();
    }
}
