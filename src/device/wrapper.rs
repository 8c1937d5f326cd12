use pumice::vk;

use super::{RawDevice, SubmitBatch};
use crate::util::ffi_ptr::AsFfiPtr;

/// [`RawDevice`] over a loaded `pumice` device.
///
/// Submission goes through `vkQueueSubmit2KHR`, so the device must have been created with
/// `VK_KHR_synchronization2` enabled.
pub struct PumiceDevice {
    device: pumice::DeviceWrapper,
}

// the wrapper only holds the device handle and a pointer to its immutable function table,
// external synchronization of the objects it creates is the responsibility of the callers
unsafe impl Send for PumiceDevice {}
unsafe impl Sync for PumiceDevice {}

impl PumiceDevice {
    /// # Safety
    /// The function table behind `device` must outlive the returned value.
    pub unsafe fn new(device: pumice::DeviceWrapper) -> Self {
        Self { device }
    }
    pub fn device(&self) -> &pumice::DeviceWrapper {
        &self.device
    }
}

impl RawDevice for PumiceDevice {
    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, vk::Result> {
        let info = vk::CommandPoolCreateInfo {
            flags,
            queue_family_index: queue_family,
            ..Default::default()
        };
        self.device.create_command_pool(&info, None)
    }
    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        let info = vk::CommandBufferAllocateInfo {
            command_pool: pool,
            level,
            command_buffer_count: count,
            ..Default::default()
        };
        self.device
            .allocate_command_buffers(&info)
            .map(|buffers| buffers.into_iter().collect())
    }
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device.destroy_command_pool(pool, None);
    }
    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
        let info = vk::SemaphoreCreateInfo::default();
        self.device.create_semaphore(&info, None)
    }
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.device.destroy_semaphore(semaphore, None);
    }
    unsafe fn create_fence(&self) -> Result<vk::Fence, vk::Result> {
        let info = vk::FenceCreateInfo::default();
        self.device.create_fence(&info, None)
    }
    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.device.destroy_fence(fence, None);
    }
    unsafe fn wait_fence(
        &self,
        fence: vk::Fence,
        timeout_ns: u64,
    ) -> Result<vk::Result, vk::Result> {
        self.device
            .wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns)
    }
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch<'_>,
    ) -> Result<(), vk::Result> {
        let wait_semaphores = batch
            .wait_semaphores
            .iter()
            .map(|&semaphore| vk::SemaphoreSubmitInfoKHR {
                semaphore,
                stage_mask: vk::PipelineStageFlags2KHR::ALL_COMMANDS,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        let signal_semaphores = batch
            .signal_semaphores
            .iter()
            .map(|&semaphore| vk::SemaphoreSubmitInfoKHR {
                semaphore,
                stage_mask: vk::PipelineStageFlags2KHR::ALL_COMMANDS,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        let command_buffers = batch
            .command_buffers
            .iter()
            .map(|&command_buffer| vk::CommandBufferSubmitInfoKHR {
                command_buffer,
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let submit = vk::SubmitInfo2KHR {
            flags: vk::SubmitFlagsKHR::empty(),
            wait_semaphore_info_count: wait_semaphores.ffi_len(),
            p_wait_semaphore_infos: wait_semaphores.as_ffi_ptr(),
            command_buffer_info_count: command_buffers.ffi_len(),
            p_command_buffer_infos: command_buffers.as_ffi_ptr(),
            signal_semaphore_info_count: signal_semaphores.ffi_len(),
            p_signal_semaphore_infos: signal_semaphores.as_ffi_ptr(),
            ..Default::default()
        };

        self.device
            .queue_submit_2_khr(
                queue,
                std::slice::from_ref(&submit),
                batch.fence.unwrap_or(vk::Fence::null()),
            )
            .map(|_| ())
    }
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), vk::Result> {
        self.device.queue_wait_idle(queue).map(|_| ())
    }
}
