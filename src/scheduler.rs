//! One-shot deferred tasks used for attempt deadlines.
//!
//! The engine only needs "run this once after a delay unless cancelled".
//! [`TokioScheduler`] does that with a spawned sleep; [`crate::sim::VirtualTime`]
//! does it on a manually advanced clock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifies a scheduled task so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`.
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Prevents a pending task from running. Returns `false` when the task
    /// already started or was never scheduled.
    fn cancel(&self, handle: TimerHandle) -> bool;
}

#[derive(Debug, Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, AbortHandle>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        // Hold the map entry while spawning so a task with a zero delay
        // cannot run its removal before the insert below.
        let entry = self.pending.entry(id);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Once the task is out of the map, cancel can no longer abort it
            // halfway through its own work.
            if pending.remove(&id).is_some() {
                task.await;
            }
        });
        entry.insert(join.abort_handle());

        debug!(timer = id, delay_ms = delay.as_millis() as u64, "Scheduled timer");
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        match self.pending.remove(&handle.0) {
            Some((_, abort)) => {
                abort.abort();
                debug!(timer = handle.0, "Cancelled timer");
                true
            }
            None => false,
        }
    }
}
