use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use ahash::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use pumice::vk;

use super::{AllocatorConfig, PoolKey};
use crate::{
    device::RawDevice,
    error::{Error, NativeResultExt, Result},
    tracing::shim_macros::{debug, trace},
};

/// A native command pool with the command buffers currently parked in it.
#[derive(Debug)]
pub(crate) struct Bundle {
    pub(crate) key: PoolKey,
    pub(crate) pool: vk::CommandPool,
    pub(crate) buffers: HashSet<vk::CommandBuffer>,
}

struct IdleBundle {
    bundle: Bundle,
    since: Instant,
}

#[derive(Default)]
struct KeySlot {
    // oldest at the front, acquire pops from the back
    idle: VecDeque<IdleBundle>,
    active: usize,
}

impl KeySlot {
    fn total(&self) -> usize {
        self.idle.len() + self.active
    }
}

#[derive(Default)]
struct Slots {
    keys: HashMap<PoolKey, KeySlot>,
    closed: bool,
}

/// Idle and active bundle counts for one key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackingStats {
    pub idle: usize,
    pub active: usize,
}

/// Keyed pool of command pool bundles, the first tier of the allocator.
///
/// Native pools are expensive to create, so a released bundle keeps its pool and buffers and is
/// only destroyed by eviction or when the pool closes.
pub(crate) struct BackingPool {
    device: Arc<dyn RawDevice>,
    capacity: usize,
    primary_count: u32,
    secondary_count: u32,
    max_wait: Duration,
    slots: Mutex<Slots>,
    released: Condvar,
}

impl BackingPool {
    pub(crate) fn new(device: Arc<dyn RawDevice>, config: &AllocatorConfig) -> Self {
        Self {
            device,
            capacity: config.backing_pool_size,
            primary_count: config.primary_per_bundle,
            secondary_count: config.secondary_per_bundle,
            max_wait: config.max_wait,
            slots: Mutex::new(Slots::default()),
            released: Condvar::new(),
        }
    }
    fn target_count(&self, key: &PoolKey) -> u32 {
        if key.level == vk::CommandBufferLevel::SECONDARY {
            self.secondary_count
        } else {
            self.primary_count
        }
    }
    pub(crate) fn acquire(&self, key: PoolKey) -> Result<Bundle> {
        let deadline = Instant::now() + self.max_wait;

        let mut slots = self.slots.lock();
        loop {
            if slots.closed {
                return Err(Error::validation("the backing pool has been closed"));
            }

            let slot = slots.keys.entry(key).or_default();
            if let Some(idle) = slot.idle.pop_back() {
                slot.active += 1;
                drop(slots);
                return self.reactivate(idle.bundle);
            }
            if slot.total() < self.capacity {
                slot.active += 1;
                drop(slots);
                return self.create(key).map_err(|e| {
                    self.forget_active(&key);
                    e
                });
            }

            trace!("Backing pool for {:?} is at capacity, waiting", key);
            if self.released.wait_until(&mut slots, deadline).timed_out() {
                return Err(Error::PoolExhausted {
                    key,
                    waited: self.max_wait,
                });
            }
        }
    }
    fn create(&self, key: PoolKey) -> Result<Bundle> {
        let pool = unsafe { self.device.create_command_pool(key.queue_family, key.flags) }
            .native("vkCreateCommandPool")?;

        let mut bundle = Bundle {
            key,
            pool,
            buffers: HashSet::default(),
        };
        if let Err(e) = self.top_up(&mut bundle) {
            unsafe { self.device.destroy_command_pool(pool) };
            return Err(e);
        }

        debug!(
            "Created command pool {:?} for {:?} with {} buffers",
            pool,
            key,
            bundle.buffers.len()
        );
        Ok(bundle)
    }
    fn top_up(&self, bundle: &mut Bundle) -> Result<()> {
        let target = self.target_count(&bundle.key) as usize;
        let deficit = target.saturating_sub(bundle.buffers.len());
        if deficit > 0 {
            let buffers = unsafe {
                self.device
                    .allocate_command_buffers(bundle.pool, bundle.key.level, deficit as u32)
            }
            .native("vkAllocateCommandBuffers")?;
            bundle.buffers.extend(buffers);
        }
        Ok(())
    }
    fn reactivate(&self, mut bundle: Bundle) -> Result<Bundle> {
        match self.top_up(&mut bundle) {
            Ok(()) => Ok(bundle),
            Err(e) => {
                self.destroy(bundle);
                Err(e)
            }
        }
    }
    fn forget_active(&self, key: &PoolKey) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.keys.get_mut(key) {
            slot.active = slot.active.saturating_sub(1);
        }
        drop(slots);
        self.released.notify_one();
    }
    /// Parks an active bundle. Once the pool is closed the bundle is destroyed instead.
    pub(crate) fn release(&self, bundle: Bundle) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.keys.get_mut(&bundle.key) {
            slot.active = slot.active.saturating_sub(1);
        }

        if slots.closed {
            drop(slots);
            unsafe { self.device.destroy_command_pool(bundle.pool) };
        } else {
            trace!("Released command pool {:?} for {:?}", bundle.pool, bundle.key);
            slots
                .keys
                .entry(bundle.key)
                .or_default()
                .idle
                .push_back(IdleBundle {
                    bundle,
                    since: Instant::now(),
                });
            drop(slots);
        }
        self.released.notify_one();
    }
    /// Destroys an active bundle, freeing its slot.
    pub(crate) fn destroy(&self, bundle: Bundle) {
        self.forget_active(&bundle.key);
        unsafe { self.device.destroy_command_pool(bundle.pool) };
    }
    /// Destroys bundles that have been idle for at least `min_idle`, returns how many.
    pub(crate) fn evict_idle(&self, min_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut slots = self.slots.lock();
            for slot in slots.keys.values_mut() {
                while let Some(oldest) = slot.idle.front() {
                    if now.saturating_duration_since(oldest.since) < min_idle {
                        break;
                    }
                    evicted.extend(slot.idle.pop_front());
                }
            }
            slots.keys.retain(|_, slot| slot.total() > 0);
        }

        for idle in &evicted {
            debug!(
                "Evicting idle command pool {:?} for {:?}",
                idle.bundle.pool, idle.bundle.key
            );
            unsafe { self.device.destroy_command_pool(idle.bundle.pool) };
        }
        if !evicted.is_empty() {
            self.released.notify_all();
        }
        evicted.len()
    }
    /// Destroys every idle bundle and refuses further acquires. Bundles still active are
    /// destroyed when they are released.
    pub(crate) fn close(&self) {
        let idle = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            slots
                .keys
                .values_mut()
                .flat_map(|slot| slot.idle.drain(..))
                .collect::<Vec<_>>()
        };
        for idle in idle {
            unsafe { self.device.destroy_command_pool(idle.bundle.pool) };
        }
        self.released.notify_all();
    }
    pub(crate) fn stats(&self) -> HashMap<PoolKey, BackingStats> {
        self.slots
            .lock()
            .keys
            .iter()
            .map(|(key, slot)| {
                (
                    *key,
                    BackingStats {
                        idle: slot.idle.len(),
                        active: slot.active,
                    },
                )
            })
            .collect()
    }
}
