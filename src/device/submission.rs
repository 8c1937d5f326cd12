use std::{fmt, sync::Arc};

use parking_lot::{Mutex, MutexGuard};
use pumice::vk;

/// A device queue together with the lock that serializes submissions to it.
///
/// Clones share the lock, so a queue should be obtained once from the device and cloned from
/// there on; two `Queue::new` calls for the same raw handle would not exclude each other.
#[derive(Clone)]
pub struct Queue {
    raw: vk::Queue,
    family: u32,
    submit_lock: Arc<Mutex<()>>,
}

impl Queue {
    pub fn new(raw: vk::Queue, family: u32) -> Self {
        Self {
            raw,
            family,
            submit_lock: Arc::new(Mutex::new(())),
        }
    }
    pub fn raw(&self) -> vk::Queue {
        self.raw
    }
    pub fn family(&self) -> u32 {
        self.family
    }
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.submit_lock.lock()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("raw", &self.raw)
            .field("family", &self.family)
            .finish()
    }
}

/// One queue submission: every wait semaphore is waited on at all command stages.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitBatch<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: Option<vk::Fence>,
}
