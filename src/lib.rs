//! Pooled command buffer recording and dependency-ordered queue submission.
//!
//! [`Allocator`] lends command buffers to threads from per-thread pools, backed by a bounded
//! pool of native command pools. [`Execution`] graphs describe GPU work and its ordering, and a
//! [`Submitter`] records and submits them with one semaphore per dependency and a single fence
//! per graph.

// log arguments go unused when the shims compile to nothing
#![cfg_attr(not(feature = "build-tracing"), allow(unused_variables))]

pub mod device;
pub mod error;
pub mod graph;
pub mod pool;
pub mod tracing;
pub(crate) mod util;

pub use device::{PumiceDevice, Queue, RawDevice, SubmitBatch};
pub use error::{Error, Result};
pub use graph::{
    execute, then, wait_for, CommandBuilder, Execution, SubmissionHandle, SubmitCallbacks,
    Submitter, SubmitterConfig,
};
pub use pool::{
    Allocator, AllocatorConfig, AllocatorStats, BackingStats, BorrowKey, EntryStats, PoolKey,
    RecordingHandle,
};
pub use pumice::vk;
