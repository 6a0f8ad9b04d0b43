mod attempt;
mod definition;
mod submission;

pub use attempt::{
    Attempt, AttemptResult, AttemptStatus, Finalization, FinalizeReason, QuestionResult,
};
pub use definition::{AssessmentDefinition, AssignmentDefinition, Question, QuestionKind};
pub use submission::{
    ReviewAction, ReviewActionKind, ReviewEntry, ReviewStatus, Submission, SubmissionContent,
};
