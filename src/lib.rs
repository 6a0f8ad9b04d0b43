//! Gradeflow: assessment attempts and assignment submissions with
//! exactly-once finalization and an instructor review state machine.
//!
//! [`WorkflowCoordinator`] is the entry point. Definitions, persistence,
//! notifications and permissions come from the collaborator traits in
//! [`collaborators`]; time comes from a [`Clock`] and a [`Scheduler`].

pub mod attempt;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod grading;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod review;
pub mod scenario;
pub mod scheduler;
pub mod sim;
pub mod terminal;

pub use clock::{Clock, SystemClock};
pub use config::{AnswerMatching, EngineConfig, ResubmissionPolicy};
pub use coordinator::WorkflowCoordinator;
pub use error::{CollaboratorError, WorkflowError};
pub use outcome::{Outcome, OutcomeCode};
pub use scheduler::{Scheduler, TokioScheduler};
pub use sim::VirtualTime;

/// Locks a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
