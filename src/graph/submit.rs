use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use pumice::vk;
use smallvec::SmallVec;

use super::{
    sort::{self, SortedGraph},
    task::{self, SubmissionHandle},
    Execution,
};
use crate::{
    device::{Queue, RawDevice, SubmitBatch},
    error::{Error, NativeResultExt, Result},
    pool::{Allocator, RecordingHandle},
    tracing::shim_macros::{debug, error, trace, warn},
};

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    /// Number of worker threads, 0 lets rayon pick.
    ///
    /// Each worker borrows through its own pool entry, so the allocator's
    /// [`backing_pool_size`](crate::AllocatorConfig::backing_pool_size) has to cover them all.
    pub worker_threads: usize,
    /// Workers are named `"{thread_name} worker #{i}"`.
    pub thread_name: String,
    /// How long a submission waits for its fence, `None` waits forever.
    pub fence_timeout: Option<Duration>,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name: "submit".to_owned(),
            fence_timeout: None,
        }
    }
}

/// Called on the worker thread once the submission has completed or failed.
///
/// With an `on_error` callback the error is handed to it and the [`SubmissionHandle`] reports
/// success; without one the handle reports the error.
#[derive(Default)]
pub struct SubmitCallbacks {
    on_success: Option<Box<dyn FnOnce() + Send>>,
    on_error: Option<Box<dyn FnOnce(Error) + Send>>,
}

impl SubmitCallbacks {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn on_success(mut self, fun: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(fun));
        self
    }
    pub fn on_error(mut self, fun: impl FnOnce(Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(fun));
        self
    }
    fn dispatch(self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                if let Some(on_success) = self.on_success {
                    on_success();
                }
                Ok(())
            }
            Err(e) => match self.on_error {
                Some(on_error) => {
                    on_error(e);
                    Ok(())
                }
                None => Err(e),
            },
        }
    }
}

/// Submits execution graphs from a pool of worker threads.
pub struct Submitter {
    workers: rayon::ThreadPool,
    fence_timeout_ns: u64,
}

impl Submitter {
    pub fn new(config: SubmitterConfig) -> Result<Self> {
        let name = config.thread_name;
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |i| format!("{name} worker #{i}"))
            .build()
            .map_err(|e| Error::Spawn(e.to_string()))?;

        let fence_timeout_ns = config
            .fence_timeout
            .map(|timeout| u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX);

        Ok(Self {
            workers,
            fence_timeout_ns,
        })
    }
    pub fn submit(&self, allocator: &Allocator, root: &Execution) -> SubmissionHandle {
        self.submit_with(allocator, root, SubmitCallbacks::default())
    }
    /// Records and submits every node reachable from `root` on a worker thread.
    ///
    /// Each dependency edge gets its own semaphore, signaled by the dependency's batch and waited
    /// on by the dependent's; the root's batch also signals a fence which the worker waits on
    /// before tearing everything down. If anything fails, every queue that has already accepted
    /// a batch of this submission is waited idle before its resources are released.
    pub fn submit_with(
        &self,
        allocator: &Allocator,
        root: &Execution,
        callbacks: SubmitCallbacks,
    ) -> SubmissionHandle {
        let (completer, handle) = task::completion();
        let allocator = allocator.clone();
        let root = root.clone();
        let fence_timeout_ns = self.fence_timeout_ns;

        self.workers.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_submission(&allocator, &root, fence_timeout_ns)
            }))
            .unwrap_or_else(|payload| Err(Error::TaskPanicked(panic_message(payload.as_ref()))));

            if let Err(e) = &result {
                error!("Submission of {:?} failed: {}", root, e);
            }

            let reported = panic::catch_unwind(AssertUnwindSafe(|| callbacks.dispatch(result)))
                .unwrap_or_else(|payload| {
                    Err(Error::TaskPanicked(panic_message(payload.as_ref())))
                });
            completer.complete(reported);
        });

        handle
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Everything a submission has created or borrowed so far.
///
/// Dropping it releases all of it. Unless the submission has been marked as completed, every
/// queue it submitted to is first waited idle, since the device may still be using the
/// semaphores and command buffers.
struct InFlight<'a> {
    allocator: &'a Allocator,
    device: Arc<dyn RawDevice>,
    semaphores: Vec<vk::Semaphore>,
    fence: Option<vk::Fence>,
    handles: Vec<RecordingHandle>,
    submitted: SmallVec<[Queue; 4]>,
    completed: bool,
}

impl<'a> InFlight<'a> {
    fn new(allocator: &'a Allocator) -> Self {
        Self {
            allocator,
            device: allocator.device().clone(),
            semaphores: Vec::new(),
            fence: None,
            handles: Vec::new(),
            submitted: SmallVec::new(),
            completed: false,
        }
    }
    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let semaphore = unsafe { self.device.create_semaphore() }.native("vkCreateSemaphore")?;
        self.semaphores.push(semaphore);
        Ok(semaphore)
    }
    fn create_fence(&mut self) -> Result<vk::Fence> {
        let fence = unsafe { self.device.create_fence() }.native("vkCreateFence")?;
        self.fence = Some(fence);
        Ok(fence)
    }
    fn borrow(&mut self, queue_family: u32) -> Result<vk::CommandBuffer> {
        let handle = self.allocator.borrow_primary(queue_family)?;
        let raw = handle.raw();
        self.handles.push(handle);
        Ok(raw)
    }
    fn submit(&mut self, queue: &Queue, batch: &SubmitBatch<'_>) -> Result<()> {
        {
            let _lock = queue.lock();
            unsafe { self.device.queue_submit(queue.raw(), batch) }.native("vkQueueSubmit2KHR")?;
        }
        if !self.submitted.iter().any(|q| q.raw() == queue.raw()) {
            self.submitted.push(queue.clone());
        }
        Ok(())
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            for queue in &self.submitted {
                debug!("Waiting for {:?} to idle before releasing resources", queue);
                let _lock = queue.lock();
                if let Err(code) = unsafe { self.device.queue_wait_idle(queue.raw()) } {
                    error!("vkQueueWaitIdle on {:?} failed with {:?}", queue, code);
                }
            }
        }

        for semaphore in self.semaphores.drain(..) {
            unsafe { self.device.destroy_semaphore(semaphore) };
        }
        if let Some(fence) = self.fence.take() {
            unsafe { self.device.destroy_fence(fence) };
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = self.allocator.give_back(handle) {
                warn!("Failed to give back a command buffer: {}", e);
            }
        }
    }
}

fn run_submission(allocator: &Allocator, root: &Execution, fence_timeout_ns: u64) -> Result<()> {
    let SortedGraph { nodes, edges } = sort::sort(root);
    let mut flight = InFlight::new(allocator);

    let mut waits = vec![SmallVec::<[vk::Semaphore; 2]>::new(); nodes.len()];
    let mut signals = vec![SmallVec::<[vk::Semaphore; 2]>::new(); nodes.len()];
    for edge in &edges {
        let semaphore = flight.create_semaphore()?;
        waits[edge.dependent].push(semaphore);
        signals[edge.dependency].push(semaphore);
    }
    let fence = flight.create_fence()?;
    let root_index = nodes.len() - 1;

    trace!(
        "Submitting {} nodes with {} dependency edges",
        nodes.len(),
        edges.len()
    );

    for (i, node) in nodes.iter().enumerate() {
        let queue = node.queue();

        let mut command_buffers: SmallVec<[vk::CommandBuffer; 2]> = SmallVec::new();
        for builder in node.builders() {
            let command_buffer = flight.borrow(queue.family())?;
            builder.record(command_buffer)?;
            command_buffers.push(command_buffer);
        }

        let batch = SubmitBatch {
            command_buffers: &command_buffers,
            wait_semaphores: &waits[i],
            signal_semaphores: &signals[i],
            fence: (i == root_index).then_some(fence),
        };
        flight.submit(queue, &batch)?;
    }

    match unsafe { flight.device.wait_fence(fence, fence_timeout_ns) }.native("vkWaitForFences")? {
        vk::Result::SUCCESS => {}
        code => return Err(Error::native("vkWaitForFences", code)),
    }

    flight.completed = true;
    Ok(())
}
