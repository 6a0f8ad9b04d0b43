use chrono::{DateTime, Utc};

use crate::collaborators::EventKind;
use crate::error::WorkflowError;
use crate::model::{ReviewActionKind, ReviewEntry, ReviewStatus, Submission};
use crate::outcome::OutcomeCode;

/// The result of applying one review action.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewTransition {
    /// Review status advanced.
    Moved { from: ReviewStatus, to: ReviewStatus },
    /// Approved or disapproved again; only the feedback changed.
    Reaffirmed(ReviewStatus),
    /// Grade set. `previous` is the grade it replaced, if any.
    Graded { previous: Option<f64>, value: f64 },
    /// Valid action with no effect.
    Unchanged,
}

impl ReviewTransition {
    pub fn code(&self) -> OutcomeCode {
        match self {
            ReviewTransition::Moved { .. } | ReviewTransition::Reaffirmed(_) => {
                OutcomeCode::Committed
            }
            ReviewTransition::Graded { previous: Some(_), .. } => OutcomeCode::Regraded,
            ReviewTransition::Graded { previous: None, .. } => OutcomeCode::Committed,
            ReviewTransition::Unchanged => OutcomeCode::Unchanged,
        }
    }

    /// Notification to send to the submitter, if the action changed anything.
    pub fn event_kind(&self) -> Option<EventKind> {
        let status = match self {
            ReviewTransition::Moved { to, .. } => *to,
            ReviewTransition::Reaffirmed(status) => *status,
            ReviewTransition::Graded { .. } => return Some(EventKind::SubmissionGraded),
            ReviewTransition::Unchanged => return None,
        };
        match status {
            ReviewStatus::Viewed => Some(EventKind::SubmissionViewed),
            ReviewStatus::Approved => Some(EventKind::SubmissionApproved),
            ReviewStatus::Disapproved => Some(EventKind::SubmissionDisapproved),
            ReviewStatus::Pending => None,
        }
    }
}

/// Drives a [`Submission`] through its review states.
///
/// ```text
/// pending ──view──▶ viewed
///    │                │
///    ├──approve───────┼──▶ approved ⟲ (re-approve)
///    └──disapprove────┴──▶ disapproved ⟲ (re-disapprove)
/// ```
///
/// Grading is orthogonal and allowed from every state. Nothing ever returns
/// to pending, and approved/disapproved do not switch into each other.
pub struct ReviewMachine;

impl ReviewMachine {
    /// Validates and applies `action` to `submission`. On error the
    /// submission is untouched.
    pub fn apply(
        submission: &mut Submission,
        action: &ReviewActionKind,
        actor_id: &str,
        total_points: f64,
        at: DateTime<Utc>,
    ) -> Result<ReviewTransition, WorkflowError> {
        let current = submission.review_status;

        let transition = match action {
            ReviewActionKind::MarkViewed => match current {
                ReviewStatus::Pending => ReviewTransition::Moved {
                    from: current,
                    to: ReviewStatus::Viewed,
                },
                _ => ReviewTransition::Unchanged,
            },
            ReviewActionKind::Approve { .. } => match current {
                ReviewStatus::Pending | ReviewStatus::Viewed => ReviewTransition::Moved {
                    from: current,
                    to: ReviewStatus::Approved,
                },
                ReviewStatus::Approved => ReviewTransition::Reaffirmed(current),
                ReviewStatus::Disapproved => {
                    return Err(WorkflowError::InvalidTransition {
                        from: current,
                        action: action.name(),
                    });
                }
            },
            ReviewActionKind::Disapprove { feedback } => {
                if feedback.trim().is_empty() {
                    return Err(WorkflowError::FeedbackRequired);
                }
                match current {
                    ReviewStatus::Pending | ReviewStatus::Viewed => ReviewTransition::Moved {
                        from: current,
                        to: ReviewStatus::Disapproved,
                    },
                    ReviewStatus::Disapproved => ReviewTransition::Reaffirmed(current),
                    ReviewStatus::Approved => {
                        return Err(WorkflowError::InvalidTransition {
                            from: current,
                            action: action.name(),
                        });
                    }
                }
            }
            ReviewActionKind::Grade { value, .. } => {
                if !(value.is_finite() && (0.0..=total_points).contains(value)) {
                    return Err(WorkflowError::GradeOutOfRange {
                        value: *value,
                        max: total_points,
                    });
                }
                ReviewTransition::Graded {
                    previous: submission.grade,
                    value: *value,
                }
            }
        };

        // Validation is done; from here on the submission is mutated.
        match &transition {
            ReviewTransition::Moved { to, .. } => {
                submission.review_status = *to;
                submission.review_history.push(ReviewEntry {
                    status: *to,
                    actor_id: actor_id.to_string(),
                    at,
                });
            }
            ReviewTransition::Reaffirmed(status) => {
                submission.review_history.push(ReviewEntry {
                    status: *status,
                    actor_id: actor_id.to_string(),
                    at,
                });
            }
            ReviewTransition::Graded { value, .. } => {
                submission.grade = Some(*value);
                submission.graded_by = Some(actor_id.to_string());
                submission.graded_at = Some(at);
            }
            ReviewTransition::Unchanged => {}
        }

        match action {
            ReviewActionKind::Approve { feedback: Some(text) }
            | ReviewActionKind::Grade {
                feedback: Some(text),
                ..
            } => submission.feedback = Some(text.clone()),
            ReviewActionKind::Disapprove { feedback } => {
                submission.feedback = Some(feedback.clone())
            }
            _ => {}
        }

        Ok(transition)
    }
}
