use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

struct Shared {
    result: Mutex<Option<Result<()>>>,
    done: Condvar,
}

/// Completion of a submission running on the scheduler's workers.
///
/// Dropping the handle does not cancel the submission.
pub struct SubmissionHandle {
    shared: Arc<Shared>,
}

impl SubmissionHandle {
    /// Blocks until the submission has finished.
    pub fn join(self) -> Result<()> {
        let mut result = self.shared.result.lock();
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            self.shared.done.wait(&mut result);
        }
    }
    /// Blocks for at most `timeout`, `None` if the submission is still running.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let mut result = self.shared.result.lock();
        if result.is_none() {
            self.shared.done.wait_for(&mut result, timeout);
        }
        result.clone()
    }
    pub fn is_finished(&self) -> bool {
        self.shared.result.lock().is_some()
    }
}

/// The producing half of a [`SubmissionHandle`].
///
/// If it is dropped without completing, e.g. because the task unwound past it, the handle reports
/// [`Error::TaskPanicked`] instead of blocking forever.
pub(crate) struct Completer {
    shared: Option<Arc<Shared>>,
}

impl Completer {
    pub(crate) fn complete(mut self, result: Result<()>) {
        if let Some(shared) = self.shared.take() {
            Self::publish(&shared, result);
        }
    }
    fn publish(shared: &Shared, result: Result<()>) {
        *shared.result.lock() = Some(result);
        shared.done.notify_all();
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::publish(
                &shared,
                Err(Error::TaskPanicked(
                    "the submission task ended without a result".to_owned(),
                )),
            );
        }
    }
}

pub(crate) fn completion() -> (Completer, SubmissionHandle) {
    let shared = Arc::new(Shared {
        result: Mutex::new(None),
        done: Condvar::new(),
    });
    (
        Completer {
            shared: Some(shared.clone()),
        },
        SubmissionHandle { shared },
    )
}
