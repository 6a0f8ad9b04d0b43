use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instructor-driven review status. Grade is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Viewed,
    Approved,
    Disapproved,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Viewed => write!(f, "viewed"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Disapproved => write!(f, "disapproved"),
        }
    }
}

/// What the submitter handed in. At least one field must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file_ref: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SubmissionContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        [&self.text, &self.file_ref, &self.url]
            .iter()
            .all(|field| field.as_deref().is_none_or(|s| s.trim().is_empty()))
    }
}

/// One step in a submission's review trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub status: ReviewStatus,
    pub actor_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub assignment_id: String,
    pub submitter_id: String,
    pub content: SubmissionContent,
    pub submitted_at: DateTime<Utc>,
    pub late: bool,
    pub review_status: ReviewStatus,
    pub review_history: Vec<ReviewEntry>,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub graded_by: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        assignment_id: String,
        submitter_id: String,
        content: SubmissionContent,
        submitted_at: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            submitter_id,
            content,
            submitted_at,
            late: submitted_at > due_date,
            review_status: ReviewStatus::Pending,
            review_history: Vec::new(),
            grade: None,
            feedback: None,
            graded_by: None,
            graded_at: None,
        }
    }

    /// Nobody has looked at or graded this submission yet.
    pub fn is_untouched(&self) -> bool {
        self.review_status == ReviewStatus::Pending && self.grade.is_none()
    }
}

/// Instructor command against a submission. Ephemeral: only its effect on
/// the [`Submission`] is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAction {
    pub actor_id: String,
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub kind: ReviewActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewActionKind {
    MarkViewed,
    Approve {
        #[serde(default)]
        feedback: Option<String>,
    },
    Disapprove {
        feedback: String,
    },
    Grade {
        value: f64,
        #[serde(default)]
        feedback: Option<String>,
    },
}

impl ReviewActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewActionKind::MarkViewed => "mark viewed",
            ReviewActionKind::Approve { .. } => "approve",
            ReviewActionKind::Disapprove { .. } => "disapprove",
            ReviewActionKind::Grade { .. } => "grade",
        }
    }
}
