use std::fmt;

use serde::{Deserialize, Serialize};

/// How an operation resolved. Everything except [`OutcomeCode::Committed`],
/// [`OutcomeCode::Replaced`] and [`OutcomeCode::Regraded`] means the call
/// changed nothing and the entity is returned as it already was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCode {
    /// This call's transition landed.
    Committed,
    /// Finalize lost the race; the winner's record is returned.
    AlreadyFinalized,
    /// A submission for this assignment and submitter already exists.
    AlreadySubmitted,
    /// The earlier submission's content was replaced before the due date.
    Replaced,
    /// An existing grade was overwritten.
    Regraded,
    /// The action was valid but had no effect (e.g. viewing twice).
    Unchanged,
    /// The target was already closed or removed; the write was dropped.
    StaleIgnored,
}

impl OutcomeCode {
    pub fn changed_state(self) -> bool {
        matches!(
            self,
            OutcomeCode::Committed | OutcomeCode::Replaced | OutcomeCode::Regraded
        )
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeCode::Committed => "committed",
            OutcomeCode::AlreadyFinalized => "already finalized",
            OutcomeCode::AlreadySubmitted => "already submitted",
            OutcomeCode::Replaced => "replaced",
            OutcomeCode::Regraded => "regraded",
            OutcomeCode::Unchanged => "unchanged",
            OutcomeCode::StaleIgnored => "stale, ignored",
        };
        f.write_str(s)
    }
}

/// Committed entity state plus how the call resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub entity: T,
    pub code: OutcomeCode,
}

impl<T> Outcome<T> {
    pub fn new(entity: T, code: OutcomeCode) -> Self {
        Self { entity, code }
    }

    pub fn committed(entity: T) -> Self {
        Self::new(entity, OutcomeCode::Committed)
    }
}
