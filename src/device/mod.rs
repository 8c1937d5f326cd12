//! The native API seam.
//!
//! Everything above this module talks to the driver through [`RawDevice`], which covers exactly
//! the command pool and synchronization entry points the pools and the scheduler need.
//! [`PumiceDevice`] implements it over a loaded `pumice` device.

#[cfg(test)]
pub(crate) mod fake;
pub mod submission;
mod wrapper;

use pumice::vk;

pub use submission::{Queue, SubmitBatch};
pub use wrapper::PumiceDevice;

pub trait RawDevice: Send + Sync {
    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, vk::Result>;
    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result>;
    /// Destroying the pool frees every command buffer allocated from it.
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn create_fence(&self) -> Result<vk::Fence, vk::Result>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `vk::Result::SUCCESS` once the fence is signaled or `vk::Result::TIMEOUT`.
    unsafe fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64)
        -> Result<vk::Result, vk::Result>;

    /// The caller holds the queue's submission lock.
    unsafe fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch<'_>)
        -> Result<(), vk::Result>;
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), vk::Result>;
}
