//! Execution graphs: units of recorded GPU work and the order they must be submitted in.
//!
//! An [`Execution`] is immutable once built. Adding dependencies produces a new node that refers
//! to the old ones, so a node may be reachable through several paths (a diamond) and graphs are
//! acyclic by construction. Nodes are told apart by identity, never by value.

pub mod sort;
pub mod submit;
pub mod task;

use std::{fmt, sync::Arc};

use pumice::vk;
use smallvec::SmallVec;

use crate::{device::Queue, error::Result};

pub use sort::{Edge, SortedGraph};
pub use submit::{SubmitCallbacks, Submitter, SubmitterConfig};
pub use task::SubmissionHandle;

/// Records commands into a command buffer borrowed for it by the scheduler.
///
/// The builder owns the whole recording, including `vkBeginCommandBuffer` and
/// `vkEndCommandBuffer`.
pub trait CommandBuilder: Send + Sync {
    fn record(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
}

impl<F: Fn(vk::CommandBuffer) -> Result<()> + Send + Sync> CommandBuilder for F {
    fn record(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self(command_buffer)
    }
}

struct ExecutionNode {
    builders: SmallVec<[Arc<dyn CommandBuilder>; 1]>,
    queue: Queue,
    dependencies: Vec<Execution>,
}

// dropping a long chain would otherwise recurse once per node
impl Drop for ExecutionNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.dependencies);
        while let Some(dependency) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(dependency.0) {
                pending.append(&mut node.dependencies);
            }
        }
    }
}

/// A node of an execution graph: builders recorded and submitted together on one queue after
/// every dependency has been submitted.
#[derive(Clone)]
pub struct Execution(Arc<ExecutionNode>);

impl Execution {
    /// A dependency-free node with a single builder.
    pub fn execute<B: CommandBuilder + 'static>(builder: B, queue: Queue) -> Self {
        Self::execute_all([Arc::new(builder) as Arc<dyn CommandBuilder>], queue)
    }
    /// A dependency-free node whose builders are each recorded into their own command buffer and
    /// submitted in one batch, in order.
    pub fn execute_all(
        builders: impl IntoIterator<Item = Arc<dyn CommandBuilder>>,
        queue: Queue,
    ) -> Self {
        Self(Arc::new(ExecutionNode {
            builders: builders.into_iter().collect(),
            queue,
            dependencies: Vec::new(),
        }))
    }
    /// Returns a new node that also waits for `dependencies`, `self` is left untouched.
    ///
    /// Dependencies that are already present are skipped.
    pub fn wait_for(&self, dependencies: impl IntoIterator<Item = Execution>) -> Self {
        let mut all = self.0.dependencies.clone();
        for dependency in dependencies {
            if !all.iter().any(|d| d.ptr_eq(&dependency)) {
                all.push(dependency);
            }
        }
        Self(Arc::new(ExecutionNode {
            builders: self.0.builders.clone(),
            queue: self.0.queue.clone(),
            dependencies: all,
        }))
    }
    /// A new node running `builder` on `queue` once `self` has been submitted.
    pub fn then<B: CommandBuilder + 'static>(&self, builder: B, queue: Queue) -> Self {
        Self::execute(builder, queue).wait_for([self.clone()])
    }
    /// Returns a new node with `builder` appended, `self` is left untouched.
    pub fn with_builder<B: CommandBuilder + 'static>(&self, builder: B) -> Self {
        let mut builders = self.0.builders.clone();
        builders.push(Arc::new(builder));
        Self(Arc::new(ExecutionNode {
            builders,
            queue: self.0.queue.clone(),
            dependencies: self.0.dependencies.clone(),
        }))
    }
    pub fn queue(&self) -> &Queue {
        &self.0.queue
    }
    pub fn builders(&self) -> &[Arc<dyn CommandBuilder>] {
        &self.0.builders
    }
    pub fn dependencies(&self) -> &[Execution] {
        &self.0.dependencies
    }
    pub fn ptr_eq(&self, other: &Execution) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
    /// Identity of the node, valid for as long as any clone of it is alive.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("queue", &self.0.queue)
            .field("builders", &self.0.builders.len())
            .field("dependencies", &self.0.dependencies.len())
            .finish()
    }
}

pub fn execute<B: CommandBuilder + 'static>(builder: B, queue: Queue) -> Execution {
    Execution::execute(builder, queue)
}

pub fn wait_for(
    execution: &Execution,
    dependencies: impl IntoIterator<Item = Execution>,
) -> Execution {
    execution.wait_for(dependencies)
}

pub fn then<B: CommandBuilder + 'static>(
    previous: &Execution,
    builder: B,
    queue: Queue,
) -> Execution {
    previous.then(builder, queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;

    fn noop(_: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    #[test]
    fn wait_for_does_not_mutate() {
        let device = FakeDevice::new();
        let queue = device.queue(0);

        let a = execute(noop, queue.clone());
        let b = execute(noop, queue.clone());
        let b2 = wait_for(&b, [a.clone()]);

        assert!(b.dependencies().is_empty());
        assert_eq!(b2.dependencies().len(), 1);
        assert!(b2.dependencies()[0].ptr_eq(&a));
        assert!(!b2.ptr_eq(&b));

        let b3 = b2.wait_for([a.clone(), a.clone()]);
        assert_eq!(b3.dependencies().len(), 1);
    }

    #[test]
    fn then_chains_on_the_previous_node() {
        let device = FakeDevice::new();
        let a = execute(noop, device.queue(0));
        let b = then(&a, noop, device.queue(1));

        assert_eq!(b.queue().family(), 1);
        assert_eq!(b.builders().len(), 1);
        assert!(b.dependencies()[0].ptr_eq(&a));
    }

    #[test]
    fn with_builder_appends() {
        let device = FakeDevice::new();
        let a = execute(noop, device.queue(0));
        let b = a.then(noop, device.queue(0)).with_builder(noop);

        assert_eq!(a.builders().len(), 1);
        assert_eq!(b.builders().len(), 2);
        assert_eq!(b.dependencies().len(), 1);

        let c = Execution::execute_all(b.builders().iter().cloned(), device.queue(0));
        assert_eq!(c.builders().len(), 2);
        assert!(c.dependencies().is_empty());
    }
}
