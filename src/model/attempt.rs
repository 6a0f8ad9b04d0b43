use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::InProgress => write!(f, "in progress"),
            AttemptStatus::Submitted => write!(f, "submitted"),
            AttemptStatus::Graded => write!(f, "graded"),
        }
    }
}

/// Who closed the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    Manual,
    Timeout,
}

impl fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeReason::Manual => write!(f, "manual"),
            FinalizeReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// The terminal record written by whichever finalize call wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    pub reason: FinalizeReason,
    pub at: DateTime<Utc>,
}

/// Credit given for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub index: u32,
    pub points: f64,
    /// `None` while the question waits for an external grader.
    pub awarded: Option<f64>,
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub score: f64,
    pub total_points: f64,
    pub percentage: u32,
    pub passed: bool,
    pub questions: Vec<QuestionResult>,
}

impl AttemptResult {
    /// Indices of questions still waiting for a grader.
    pub fn pending_questions(&self) -> Vec<u32> {
        self.questions
            .iter()
            .filter(|q| q.awarded.is_none())
            .map(|q| q.index)
            .collect()
    }
}

/// A time limit as a signed duration, or `None` when it does not fit.
pub(crate) fn limit_delta(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// One submitter's run at a quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub assessment_id: String,
    pub submitter_id: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub time_limit_secs: Option<u64>,
    pub answers: BTreeMap<u32, String>,
    pub status: AttemptStatus,
    pub finalization: Option<Finalization>,
    /// A manual submit that committed after the deadline.
    #[serde(default)]
    pub submitted_late: bool,
    pub result: Option<AttemptResult>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn new(
        assessment_id: String,
        submitter_id: String,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        time_limit_secs: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assessment_id,
            submitter_id,
            attempt_number,
            started_at,
            time_limit_secs,
            answers: BTreeMap::new(),
            status: AttemptStatus::InProgress,
            finalization: None,
            submitted_late: false,
            result: None,
            graded_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    pub fn finalize_reason(&self) -> Option<FinalizeReason> {
        self.finalization.map(|f| f.reason)
    }

    /// A limit too large to add to the start time puts the deadline at
    /// the end of representable time.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.time_limit_secs.map(|secs| {
            limit_delta(secs)
                .and_then(|limit| self.started_at.checked_add_signed(limit))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Whole seconds left at `now`: `max(0, limit - (now - start))`.
    /// Untimed attempts return `None`; closed attempts return zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        let deadline = self.deadline()?;
        if !self.is_open() {
            return Some(0);
        }
        let left = (deadline - now).num_milliseconds();
        // Round partial seconds up so the count never reaches 0 early.
        Some((left.max(0) as u64).div_ceil(1000))
    }
}
