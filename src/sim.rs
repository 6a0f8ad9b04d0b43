//! Deterministic time for scenario replay and tests.
//!
//! [`VirtualTime`] is both a [`Clock`] and a [`Scheduler`]. Nothing moves
//! until [`VirtualTime::advance`] is awaited, which steps the clock forward
//! and runs every task whose deadline was crossed, in deadline order.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::lock;
use crate::scheduler::{Scheduler, TimerHandle, TimerTask};

struct PendingTask {
    id: u64,
    due: DateTime<Utc>,
    task: TimerTask,
}

pub struct VirtualTime {
    now: Mutex<DateTime<Utc>>,
    next_id: AtomicU64,
    pending: Mutex<Vec<PendingTask>>,
}

impl VirtualTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Moves the clock forward by `by`, running due tasks as their
    /// deadlines are reached. Tasks scheduled by a running task are
    /// honoured if they fall inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = offset(self.now(), by);
        loop {
            let next = {
                let mut pending = lock(&self.pending);
                let due_idx = pending
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);
                due_idx.map(|i| pending.swap_remove(i))
            };
            let Some(task) = next else { break };
            self.set_now(task.due);
            debug!(timer = task.id, due = %task.due, "Virtual timer fired");
            task.task.await;
        }
        self.set_now(target);
    }

    fn set_now(&self, at: DateTime<Utc>) {
        let mut now = lock(&self.now);
        if at > *now {
            *now = at;
        }
    }
}

fn offset(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Clock for VirtualTime {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

impl Scheduler for VirtualTime {
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let due = offset(self.now(), delay);
        lock(&self.pending).push(PendingTask { id, due, task });
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut pending = lock(&self.pending);
        let before = pending.len();
        pending.retain(|t| t.id != handle.0);
        pending.len() != before
    }
}
