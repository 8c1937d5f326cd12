//! Background maintenance of the allocator.
//!
//! Two tasks run per allocator: the reclaimer returns entries whose owning thread has exited, and
//! the evictor releases idle registry entries and then destroys idle backing bundles.

use std::{sync::Arc, time::Duration};

use super::handles::HandlePool;
use crate::{
    error::Result,
    tracing::shim_macros::{debug, info},
    util::background::BackgroundTask,
};

pub(crate) fn spawn_reclaimer(pool: Arc<HandlePool>, interval: Duration) -> Result<BackgroundTask> {
    let name = format!("cmd-reclaimer-{}", pool.id);
    BackgroundTask::spawn(name, interval, move || {
        let reclaimed = pool.reclaim_abandoned();
        if reclaimed > 0 {
            info!("Reclaimed {} command pool entries of exited threads", reclaimed);
        }
    })
}

pub(crate) fn spawn_evictor(
    pool: Arc<HandlePool>,
    interval: Duration,
    min_idle: Duration,
) -> Result<BackgroundTask> {
    let name = format!("cmd-evictor-{}", pool.id);
    BackgroundTask::spawn(name, interval, move || {
        let (entries, bundles) = evict_idle(&pool, min_idle);
        if entries > 0 || bundles > 0 {
            debug!(
                "Idle sweep released {} registry entries and destroyed {} command pools",
                entries, bundles
            );
        }
    })
}

/// Releases idle registry entries first so they can age in the backing pool on later sweeps.
pub(crate) fn evict_idle(pool: &HandlePool, min_idle: Duration) -> (usize, usize) {
    let entries = pool.evict_idle(min_idle);
    let bundles = pool.backing.evict_idle(min_idle);
    (entries, bundles)
}
