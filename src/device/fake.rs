//! A driver-less [`RawDevice`] for tests.
//!
//! Hands out unique handles, tracks which objects are alive, records every submission and can be
//! told to fail specific calls. Fences are signaled as soon as they are submitted unless the
//! fence gate is closed, in which case `wait_fence` blocks until it is opened.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ahash::HashSet;
use parking_lot::{Condvar, Mutex, MutexGuard};
use pumice::{util::ObjectHandle, vk};

use super::{Queue, RawDevice, SubmitBatch};

#[derive(Clone, Debug)]
pub(crate) struct RecordedSubmit {
    pub(crate) queue: vk::Queue,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    pub(crate) wait_semaphores: Vec<vk::Semaphore>,
    pub(crate) signal_semaphores: Vec<vk::Semaphore>,
    pub(crate) fence: Option<vk::Fence>,
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub(crate) live_pools: HashSet<vk::CommandPool>,
    pub(crate) pools_created: usize,
    pub(crate) pools_destroyed: usize,
    pub(crate) buffers_allocated: usize,

    pub(crate) live_semaphores: HashSet<vk::Semaphore>,
    pub(crate) semaphores_created: usize,
    pub(crate) live_fences: HashSet<vk::Fence>,
    pub(crate) fences_created: usize,
    signaled_fences: HashSet<vk::Fence>,

    pub(crate) submissions: Vec<RecordedSubmit>,
    pub(crate) waited_idle: Vec<vk::Queue>,
    /// Destroy calls on objects that were not alive.
    pub(crate) invalid_destroys: usize,

    pub(crate) fail_submit_at: Option<usize>,
    submit_calls: usize,
    pub(crate) fail_pool_creation: bool,
    pub(crate) fail_fence_wait: bool,
}

pub(crate) struct FakeDevice {
    next_handle: AtomicU64,
    state: Mutex<FakeState>,
    gate_closed: Mutex<bool>,
    gate_opened: Condvar,
}

impl FakeDevice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(FakeState::default()),
            gate_closed: Mutex::new(false),
            gate_opened: Condvar::new(),
        })
    }
    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }
    pub(crate) fn queue(&self, family: u32) -> Queue {
        Queue::new(vk::Queue::from_raw(self.next_raw() as _), family)
    }
    /// Makes the `index`-th `queue_submit` call (counting from zero) fail with `ERROR_DEVICE_LOST`.
    pub(crate) fn fail_submit_at(&self, index: usize) {
        self.state.lock().fail_submit_at = Some(index);
    }
    pub(crate) fn close_fence_gate(&self) {
        *self.gate_closed.lock() = true;
    }
    pub(crate) fn open_fence_gate(&self) {
        *self.gate_closed.lock() = false;
        self.gate_opened.notify_all();
    }
    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl RawDevice for FakeDevice {
    unsafe fn create_command_pool(
        &self,
        _queue_family: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, vk::Result> {
        let mut state = self.state.lock();
        if state.fail_pool_creation {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let pool = vk::CommandPool::from_raw(self.next_raw() as _);
        state.live_pools.insert(pool);
        state.pools_created += 1;
        Ok(pool)
    }
    unsafe fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        let mut state = self.state.lock();
        assert!(
            state.live_pools.contains(&pool),
            "allocating from a destroyed command pool"
        );
        state.buffers_allocated += count as usize;
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.next_raw() as _))
            .collect())
    }
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        if state.live_pools.remove(&pool) {
            state.pools_destroyed += 1;
        } else {
            state.invalid_destroys += 1;
        }
    }
    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(self.next_raw() as _);
        state.live_semaphores.insert(semaphore);
        state.semaphores_created += 1;
        Ok(semaphore)
    }
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        if !state.live_semaphores.remove(&semaphore) {
            state.invalid_destroys += 1;
        }
    }
    unsafe fn create_fence(&self) -> Result<vk::Fence, vk::Result> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(self.next_raw() as _);
        state.live_fences.insert(fence);
        state.fences_created += 1;
        Ok(fence)
    }
    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.signaled_fences.remove(&fence);
        if !state.live_fences.remove(&fence) {
            state.invalid_destroys += 1;
        }
    }
    unsafe fn wait_fence(
        &self,
        fence: vk::Fence,
        _timeout_ns: u64,
    ) -> Result<vk::Result, vk::Result> {
        {
            let mut closed = self.gate_closed.lock();
            while *closed {
                self.gate_opened.wait(&mut closed);
            }
        }

        let state = self.state.lock();
        if state.fail_fence_wait {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        if state.signaled_fences.contains(&fence) {
            Ok(vk::Result::SUCCESS)
        } else {
            Ok(vk::Result::TIMEOUT)
        }
    }
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch<'_>,
    ) -> Result<(), vk::Result> {
        let mut state = self.state.lock();
        let call = state.submit_calls;
        state.submit_calls += 1;
        if state.fail_submit_at == Some(call) {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }

        for semaphore in batch.wait_semaphores.iter().chain(batch.signal_semaphores) {
            assert!(
                state.live_semaphores.contains(semaphore),
                "submitted a destroyed semaphore"
            );
        }
        if let Some(fence) = batch.fence {
            state.signaled_fences.insert(fence);
        }
        state.submissions.push(RecordedSubmit {
            queue,
            command_buffers: batch.command_buffers.to_vec(),
            wait_semaphores: batch.wait_semaphores.to_vec(),
            signal_semaphores: batch.signal_semaphores.to_vec(),
            fence: batch.fence,
        });
        Ok(())
    }
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), vk::Result> {
        self.state.lock().waited_idle.push(queue);
        Ok(())
    }
}
