//! Contracts for the systems the engine talks to but does not own.
//!
//! The content provider hands out definitions and attempt counts, the store
//! persists attempts and submissions and relays notifications, and the
//! authorizer answers permission questions. All are object-safe so the
//! coordinator can hold them behind `Arc<dyn _>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::model::{AssessmentDefinition, AssignmentDefinition, Attempt, Submission};

#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn assessment_definition(
        &self,
        id: &str,
    ) -> Result<Option<AssessmentDefinition>, CollaboratorError>;

    /// Attempts the submitter has already started for this assessment.
    async fn attempt_count(
        &self,
        assessment_id: &str,
        submitter_id: &str,
    ) -> Result<u32, CollaboratorError>;

    async fn assignment_definition(
        &self,
        id: &str,
    ) -> Result<Option<AssignmentDefinition>, CollaboratorError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), CollaboratorError>;

    async fn save_submission(&self, submission: &Submission) -> Result<(), CollaboratorError>;

    async fn delete_submission(&self, id: Uuid) -> Result<(), CollaboratorError>;

    /// Hands a status-change notification to the delivery layer.
    async fn emit(&self, event: WorkflowEvent) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AttemptSubmitted,
    AttemptGraded,
    SubmissionCreated,
    SubmissionViewed,
    SubmissionApproved,
    SubmissionDisapproved,
    SubmissionGraded,
}

/// Notification addressed to the user whose work changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub target_user_id: String,
    pub payload: serde_json::Value,
}

/// What an actor is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission<'a> {
    TakeAssessment { assessment_id: &'a str },
    Submit { assignment_id: &'a str },
    Review { assignment_id: &'a str },
    GradeAttempt { assessment_id: &'a str },
}

impl std::fmt::Display for Permission<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::TakeAssessment { assessment_id } => {
                write!(f, "take assessment {assessment_id}")
            }
            Permission::Submit { assignment_id } => write!(f, "submit to {assignment_id}"),
            Permission::Review { assignment_id } => write!(f, "review {assignment_id}"),
            Permission::GradeAttempt { assessment_id } => {
                write!(f, "grade attempts of {assessment_id}")
            }
        }
    }
}

/// Authorization lives outside the engine; this is the question it asks.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn allows(&self, actor_id: &str, permission: Permission<'_>) -> bool;
}

/// Lets everyone do everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn allows(&self, _actor_id: &str, _permission: Permission<'_>) -> bool {
        true
    }
}
