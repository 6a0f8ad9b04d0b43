use thiserror::Error;

use crate::model::ReviewStatus;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Assessment {assessment_id} is not available: {reason}")]
    NotAvailable {
        assessment_id: String,
        reason: String,
    },

    #[error("No attempts left: {used} of {allowed} already used")]
    AttemptsExhausted { allowed: u32, used: u32 },

    #[error("Feedback is required to disapprove a submission")]
    FeedbackRequired,

    #[error("Grade {value} is outside the allowed range 0..={max}")]
    GradeOutOfRange { value: f64, max: f64 },

    #[error("A submission needs text, a file reference or a URL")]
    EmptySubmission,

    #[error("Question {0} does not exist in this assessment")]
    UnknownQuestion(u32),

    #[error("Question {0} was left unanswered and keeps zero credit")]
    UnansweredQuestion(u32),

    #[error("Cannot {action} a submission that is {from}")]
    InvalidTransition {
        from: ReviewStatus,
        action: &'static str,
    },

    #[error("Attempt {0} is still in progress")]
    AttemptStillOpen(String),

    #[error("{actor} is not allowed to {action}")]
    Forbidden { actor: String, action: String },

    #[error("Invalid definition {id}: {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Caller-correctable input errors. Nothing was mutated when one of
    /// these is returned.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            WorkflowError::NotAvailable { .. }
                | WorkflowError::AttemptsExhausted { .. }
                | WorkflowError::FeedbackRequired
                | WorkflowError::GradeOutOfRange { .. }
                | WorkflowError::EmptySubmission
                | WorkflowError::UnknownQuestion(_)
                | WorkflowError::UnansweredQuestion(_)
                | WorkflowError::InvalidTransition { .. }
                | WorkflowError::AttemptStillOpen(_)
                | WorkflowError::Forbidden { .. }
        )
    }
}

/// Failures reported by the content provider or the persistence layer.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by collaborator: {0}")]
    Rejected(String),
}
