//! First-writer-wins slot shared by attempts and submissions.
//!
//! A [`TerminalSlot`] holds at most one committed value. Racing writers
//! serialize on the slot's lock; the first one to find it empty runs its
//! commit and stores the result, every later writer gets the stored value
//! back instead of running its own.

use std::future::Future;

use tokio::sync::Mutex;

/// Which side of the race a caller ended up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit<T> {
    /// This caller's commit landed.
    Won(T),
    /// Someone else committed first; this is their value.
    Lost(T),
}

impl<T> Commit<T> {
    pub fn won(&self) -> bool {
        matches!(self, Commit::Won(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Commit::Won(v) | Commit::Lost(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Commit::Won(v) | Commit::Lost(v) => v,
        }
    }
}

#[derive(Debug, Default)]
pub struct TerminalSlot<T> {
    cell: Mutex<Option<T>>,
}

impl<T: Clone> TerminalSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(None),
        }
    }

    /// Runs `commit` only if nothing has landed yet.
    ///
    /// The lock is held across `commit`, so its side effects (persistence,
    /// timer cancellation) are atomic with respect to other writers. If
    /// `commit` fails the slot stays empty and the error is returned; the
    /// next writer gets a fresh chance.
    pub async fn commit_with<F, Fut, E>(&self, commit: F) -> Result<Commit<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut cell = self.cell.lock().await;
        if let Some(existing) = cell.as_ref() {
            return Ok(Commit::Lost(existing.clone()));
        }
        let value = commit().await?;
        *cell = Some(value.clone());
        Ok(Commit::Won(value))
    }

    pub async fn get(&self) -> Option<T> {
        self.cell.lock().await.clone()
    }
}
