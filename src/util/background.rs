use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    error::{Error, Result},
    tracing::shim_macros::{debug, error},
};

#[derive(Default)]
struct Shutdown {
    requested: Mutex<bool>,
    signal: Condvar,
}

/// A named thread that runs `tick` every `interval` until it is stopped.
///
/// Stopping wakes the thread immediately instead of letting it sleep out the rest of its
/// interval, then joins it.
pub(crate) struct BackgroundTask {
    name: String,
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let shutdown = Arc::new(Shutdown::default());

        let thread_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || loop {
                {
                    let mut requested = thread_shutdown.requested.lock();
                    if !*requested {
                        thread_shutdown
                            .signal
                            .wait_for(&mut requested, interval);
                    }
                    if *requested {
                        break;
                    }
                }
                tick();
            })
            .map_err(|e| Error::Spawn(format!("{name}: {e}")))?;

        debug!("Started background task '{}' every {:?}", name, interval);

        Ok(Self {
            name,
            shutdown,
            handle: Some(handle),
        })
    }
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        *self.shutdown.requested.lock() = true;
        self.shutdown.signal.notify_all();

        if handle.join().is_err() {
            error!("Background task '{}' panicked", self.name);
        } else {
            debug!("Stopped background task '{}'", self.name);
        }
    }
    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
