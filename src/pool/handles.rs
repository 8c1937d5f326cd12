use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use pumice::vk;

use super::{
    backing::BackingPool,
    liveness::ThreadLiveness,
    registry::{PoolEntry, Registry, Reserve, Returned},
    AllocatorConfig, BorrowKey, PoolKey,
};
use crate::{
    device::RawDevice,
    error::{Error, NativeResultExt, Result},
    tracing::shim_macros::{debug, error, trace, warn},
};

/// A command buffer on loan from an [`Allocator`](super::Allocator).
///
/// It remembers where it came from so it can be given back; since it cannot be cloned and giving
/// it back consumes it, it is returned at most once.
pub struct RecordingHandle {
    buffer: vk::CommandBuffer,
    pool: vk::CommandPool,
    key: BorrowKey,
    allocator: u64,
}

impl RecordingHandle {
    pub fn raw(&self) -> vk::CommandBuffer {
        self.buffer
    }
    pub fn key(&self) -> &BorrowKey {
        &self.key
    }
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.key.pool.level
    }
}

impl fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandle")
            .field("buffer", &self.buffer)
            .field("key", &self.key)
            .finish()
    }
}

/// Per-thread lending of command buffers, the second tier of the allocator.
///
/// Each borrowing thread gets its own registry entry per [`PoolKey`], backed by a bundle from the
/// [`BackingPool`]. The entry's native pool is only ever allocated from by that thread.
pub(crate) struct HandlePool {
    pub(crate) id: u64,
    device: Arc<dyn RawDevice>,
    pub(crate) registry: Registry,
    pub(crate) backing: BackingPool,
    pub(crate) liveness: Arc<ThreadLiveness>,
    leak_diagnostics: bool,
}

impl HandlePool {
    pub(crate) fn new(id: u64, device: Arc<dyn RawDevice>, config: &AllocatorConfig) -> Self {
        Self {
            id,
            backing: BackingPool::new(device.clone(), config),
            device,
            registry: Registry::new(),
            liveness: ThreadLiveness::new(),
            leak_diagnostics: config.leak_diagnostics,
        }
    }
    pub(crate) fn device(&self) -> &Arc<dyn RawDevice> {
        &self.device
    }
    pub(crate) fn borrow(&self, key: PoolKey) -> Result<RecordingHandle> {
        let key = key.for_current_thread();
        self.liveness.register_current();

        loop {
            match self.registry.reserve(&key, Instant::now()) {
                Reserve::Missing => {
                    let bundle = self.backing.acquire(key.pool)?;
                    let entry = PoolEntry::from_bundle(bundle);
                    // the key embeds this thread's id, nobody else can have inserted it
                    if !self.registry.insert(key, entry.clone()) {
                        self.backing.release(entry.into_bundle(&key));
                    }
                    trace!("Created registry entry for {:?}", key);
                }
                Reserve::Taken { buffer, pool } => return Ok(self.handle(key, pool, buffer)),
                Reserve::Empty { pool } => {
                    let allocated = unsafe {
                        self.device
                            .allocate_command_buffers(pool, key.pool.level, 1)
                    }
                    .native("vkAllocateCommandBuffers");

                    return match allocated.map(|buffers| buffers.into_iter().next()) {
                        Ok(Some(buffer)) => {
                            trace!("Entry for {:?} ran dry, allocated {:?}", key, buffer);
                            Ok(self.handle(key, pool, buffer))
                        }
                        Ok(None) => {
                            self.registry.cancel_reservation(&key);
                            Err(Error::validation(
                                "vkAllocateCommandBuffers returned no command buffer",
                            ))
                        }
                        Err(e) => {
                            self.registry.cancel_reservation(&key);
                            Err(e)
                        }
                    };
                }
            }
        }
    }
    fn handle(
        &self,
        key: BorrowKey,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
    ) -> RecordingHandle {
        RecordingHandle {
            buffer,
            pool,
            key,
            allocator: self.id,
        }
    }
    pub(crate) fn give_back(&self, handle: RecordingHandle) -> Result<()> {
        if handle.allocator != self.id {
            return Err(Error::validation(format!(
                "{:?} was borrowed from a different allocator",
                handle
            )));
        }

        match self
            .registry
            .give_back(&handle.key, handle.pool, handle.buffer, Instant::now())
        {
            Returned::Returned => Ok(()),
            Returned::Stale => {
                // the entry was reclaimed while the buffer was out, its pool has moved on
                if self.leak_diagnostics {
                    warn!(
                        "{:?} was returned after its pool entry had been reclaimed",
                        handle
                    );
                }
                Ok(())
            }
            Returned::NotLoaned => Err(Error::validation(format!(
                "{:?} was returned to an entry with no outstanding loans",
                handle
            ))),
        }
    }
    pub(crate) fn validate(&self, key: &BorrowKey) -> bool {
        self.registry.contains(key)
    }
    /// Releases entries without loans that have been unused for at least `min_idle`.
    pub(crate) fn evict_idle(&self, min_idle: Duration) -> usize {
        let now = Instant::now();
        let removed = self.registry.remove_where(|key, entry| {
            entry.loaned == 0 && now.saturating_duration_since(entry.last_used) >= min_idle
        });
        for (key, entry) in &removed {
            debug!("Evicting idle registry entry {:?}", key);
            self.backing.release(entry.into_bundle(key));
        }
        removed.len()
    }
    /// Returns the entries of every thread that is no longer alive to the backing pool,
    /// regardless of outstanding loans.
    pub(crate) fn reclaim_abandoned(&self) -> usize {
        // liveness is checked against the map being swapped out; a borrower registers before it
        // inserts, so an entry the predicate sees always has its owner in the set already
        let removed = self
            .registry
            .remove_where(|key, _| !self.liveness.is_live(&key.thread));
        self.return_entries(removed)
    }
    /// Returns every entry to the backing pool.
    pub(crate) fn drain(&self) -> usize {
        let removed = self.registry.drain();
        self.return_entries(removed)
    }
    fn return_entries(&self, removed: Vec<(BorrowKey, Arc<PoolEntry>)>) -> usize {
        let mut returned = 0;
        for (key, entry) in removed {
            if entry.loaned > 0 && self.leak_diagnostics {
                warn!(
                    "Reclaiming {:?} with {} command buffers still on loan",
                    key, entry.loaned
                );
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.backing.release(entry.into_bundle(&key))
            }));
            match result {
                Ok(()) => returned += 1,
                Err(_) => error!("Failed to return the command pool of {:?}", key),
            }
        }
        returned
    }
}
