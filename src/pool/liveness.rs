use std::{
    cell::RefCell,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

use ahash::HashSet;
use parking_lot::Mutex;

/// Set of threads that have borrowed from an allocator and have not exited yet.
///
/// A thread joins the set on its first borrow and leaves it from a thread-local destructor when
/// it exits, which is what lets the reclaimer tell abandoned entries apart from idle ones.
pub(crate) struct ThreadLiveness {
    live: Mutex<HashSet<ThreadId>>,
}

struct ExitNotifier {
    thread: ThreadId,
    tables: Vec<Weak<ThreadLiveness>>,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        for table in self.tables.drain(..) {
            if let Some(table) = table.upgrade() {
                table.live.lock().remove(&self.thread);
            }
        }
    }
}

thread_local! {
    static EXIT_NOTIFIER: RefCell<ExitNotifier> = RefCell::new(ExitNotifier {
        thread: thread::current().id(),
        tables: Vec::new(),
    });
}

impl ThreadLiveness {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(HashSet::default()),
        })
    }
    pub(crate) fn register_current(self: &Arc<Self>) {
        let thread = thread::current().id();
        if !self.live.lock().insert(thread) {
            return;
        }

        // fails only while the thread is already tearing down its locals
        let registered = EXIT_NOTIFIER.try_with(|notifier| {
            let mut notifier = notifier.borrow_mut();
            notifier.tables.retain(|table| table.strong_count() > 0);
            notifier.tables.push(Arc::downgrade(self));
        });
        if registered.is_err() {
            self.live.lock().remove(&thread);
        }
    }
    pub(crate) fn is_live(&self, thread: &ThreadId) -> bool {
        self.live.lock().contains(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_threads_leave_the_set() {
        let liveness = ThreadLiveness::new();
        liveness.register_current();
        assert!(liveness.is_live(&thread::current().id()));

        let worker = {
            let liveness = liveness.clone();
            thread::spawn(move || {
                liveness.register_current();
                liveness.register_current();
                thread::current().id()
            })
        };
        let worker = worker.join().unwrap();

        assert!(!liveness.is_live(&worker));
        assert!(liveness.is_live(&thread::current().id()));
        assert_eq!(liveness.live.lock().len(), 1);
    }

    #[test]
    fn dropped_tables_are_skipped() {
        let worker = thread::spawn(|| {
            let liveness = ThreadLiveness::new();
            liveness.register_current();
            drop(liveness);

            let other = ThreadLiveness::new();
            other.register_current();
            other.is_live(&thread::current().id())
        });
        assert!(worker.join().unwrap());
    }
}
