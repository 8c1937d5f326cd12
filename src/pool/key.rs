use std::thread::{self, ThreadId};

use pumice::vk;

/// Identifies a class of native command pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub queue_family: u32,
    pub flags: vk::CommandPoolCreateFlags,
    pub level: vk::CommandBufferLevel,
}

impl PoolKey {
    pub fn new(
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
        level: vk::CommandBufferLevel,
    ) -> Self {
        Self {
            queue_family,
            flags,
            level,
        }
    }
    pub fn primary(queue_family: u32, flags: vk::CommandPoolCreateFlags) -> Self {
        Self::new(queue_family, flags, vk::CommandBufferLevel::PRIMARY)
    }
    pub fn secondary(queue_family: u32, flags: vk::CommandPoolCreateFlags) -> Self {
        Self::new(queue_family, flags, vk::CommandBufferLevel::SECONDARY)
    }
    /// The slice of this key owned by the calling thread.
    pub fn for_current_thread(self) -> BorrowKey {
        BorrowKey {
            pool: self,
            thread: thread::current().id(),
        }
    }
}

/// A [`PoolKey`] narrowed down to one owning thread.
///
/// Only the owning thread ever creates the registry entry for its key, so first-use never races.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BorrowKey {
    pub pool: PoolKey,
    pub thread: ThreadId,
}
