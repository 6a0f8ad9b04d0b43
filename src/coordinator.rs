//! Workflow Coordinator: the single entry point callers use.
//!
//! Fetches definitions from the content provider, checks permissions and
//! counts, and hands the work to the [`AttemptController`] or the
//! [`ReviewMachine`]. Submission creation is exactly-once per assignment
//! and submitter through the same [`TerminalSlot`] primitive attempts use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attempt::AttemptController;
use crate::clock::Clock;
use crate::collaborators::{
    AllowAll, Authorizer, ContentProvider, EventKind, Permission, WorkflowEvent, WorkflowStore,
};
use crate::config::{EngineConfig, ResubmissionPolicy};
use crate::error::WorkflowError;
use crate::model::{
    AssignmentDefinition, Attempt, FinalizeReason, ReviewAction, ReviewActionKind, Submission,
    SubmissionContent,
};
use crate::outcome::{Outcome, OutcomeCode};
use crate::review::{ReviewMachine, ReviewTransition};
use crate::scheduler::Scheduler;
use crate::terminal::{Commit, TerminalSlot};

type PairKey = (String, String);

struct SubmissionEntry {
    total_points: f64,
    submission: Mutex<Submission>,
    removed: AtomicBool,
}

pub struct WorkflowCoordinator {
    content: Arc<dyn ContentProvider>,
    store: Arc<dyn WorkflowStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    attempts: AttemptController,
    // Serializes start_attempt per (assessment, submitter) so two tabs
    // cannot both read the same attempt count.
    start_guards: DashMap<PairKey, Arc<Mutex<()>>>,
    submissions: DashMap<Uuid, Arc<SubmissionEntry>>,
    submission_slots: DashMap<PairKey, Arc<TerminalSlot<Uuid>>>,
}

impl WorkflowCoordinator {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        store: Arc<dyn WorkflowStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let attempts = AttemptController::new(
            Arc::clone(&store),
            scheduler,
            Arc::clone(&clock),
            config.answer_matching,
        );
        Self {
            content,
            store,
            authorizer: Arc::new(AllowAll),
            clock,
            config,
            attempts,
            start_guards: DashMap::new(),
            submissions: DashMap::new(),
            submission_slots: DashMap::new(),
        }
    }

    /// Replaces the default allow-everything authorizer.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Attempts ---

    pub async fn start_attempt(
        &self,
        assessment_id: &str,
        submitter_id: &str,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        self.authorize(submitter_id, Permission::TakeAssessment { assessment_id })
            .await?;

        let key = (assessment_id.to_string(), submitter_id.to_string());
        let guard = self.start_guards.entry(key.clone()).or_default().clone();
        let started = {
            let _held = guard.lock().await;
            self.start_guarded(assessment_id, submitter_id).await
        };
        drop(guard);
        // Clones are only taken under the map's shard lock, so a count of one
        // means no other start is waiting on this pair.
        self.start_guards
            .remove_if(&key, |_, g| Arc::strong_count(g) == 1);

        started.map(Outcome::committed)
    }

    async fn start_guarded(
        &self,
        assessment_id: &str,
        submitter_id: &str,
    ) -> Result<Attempt, WorkflowError> {
        let definition = self
            .content
            .assessment_definition(assessment_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("assessment", assessment_id))?;
        let prior = self
            .content
            .attempt_count(assessment_id, submitter_id)
            .await?;

        self.attempts
            .start(Arc::new(definition), submitter_id, prior)
            .await
    }

    pub async fn record_answer(
        &self,
        attempt_id: Uuid,
        question_index: u32,
        text: &str,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        self.attempts
            .record_answer(attempt_id, question_index, text)
            .await
    }

    /// Manual submit. Resolves against the timer's record if it got there
    /// first.
    pub async fn submit_attempt(&self, attempt_id: Uuid) -> Result<Outcome<Attempt>, WorkflowError> {
        self.attempts
            .finalize(attempt_id, FinalizeReason::Manual)
            .await
    }

    pub fn get_time_remaining(&self, attempt_id: Uuid) -> Result<Option<u64>, WorkflowError> {
        self.attempts.time_remaining(attempt_id)
    }

    pub async fn grade_attempt(
        &self,
        grader_id: &str,
        attempt_id: Uuid,
        scores: &BTreeMap<u32, f64>,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        let attempt = self.attempts.get(attempt_id)?;
        self.authorize(
            grader_id,
            Permission::GradeAttempt {
                assessment_id: &attempt.assessment_id,
            },
        )
        .await?;
        self.attempts.grade(attempt_id, scores).await
    }

    pub fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt, WorkflowError> {
        self.attempts.get(attempt_id)
    }

    // --- Submissions ---

    /// Creates the submitter's submission for an assignment. A second call
    /// for the same pair returns the first submission, or replaces its
    /// content when [`ResubmissionPolicy::ReplaceBeforeDue`] allows it.
    pub async fn create_submission(
        &self,
        assignment_id: &str,
        submitter_id: &str,
        content: SubmissionContent,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        if content.is_empty() {
            return Err(WorkflowError::EmptySubmission);
        }
        self.authorize(submitter_id, Permission::Submit { assignment_id })
            .await?;

        let assignment = self
            .content
            .assignment_definition(assignment_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("assignment", assignment_id))?;

        let slot = self
            .submission_slots
            .entry((assignment_id.to_string(), submitter_id.to_string()))
            .or_default()
            .clone();

        let commit = slot
            .commit_with(|| self.insert_submission(&assignment, submitter_id, &content))
            .await?;

        match commit {
            Commit::Won(id) => {
                let entry = self.submission_entry(id)?;
                let snapshot = entry.submission.lock().await.clone();
                Ok(Outcome::committed(snapshot))
            }
            Commit::Lost(id) => self.resubmit(id, &assignment, content).await,
        }
    }

    async fn insert_submission(
        &self,
        assignment: &AssignmentDefinition,
        submitter_id: &str,
        content: &SubmissionContent,
    ) -> Result<Uuid, WorkflowError> {
        let submission = Submission::new(
            assignment.id.clone(),
            submitter_id.to_string(),
            content.clone(),
            self.clock.now(),
            assignment.due_date,
        );
        self.store.save_submission(&submission).await?;

        let id = submission.id;
        info!(
            submission_id = %id,
            assignment_id = %assignment.id,
            submitter_id,
            late = submission.late,
            "Submission created"
        );
        self.notify(created_event(&submission, false)).await;

        self.submissions.insert(
            id,
            Arc::new(SubmissionEntry {
                total_points: assignment.total_points,
                submission: Mutex::new(submission),
                removed: AtomicBool::new(false),
            }),
        );
        Ok(id)
    }

    async fn resubmit(
        &self,
        id: Uuid,
        assignment: &AssignmentDefinition,
        content: SubmissionContent,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        let entry = self.submission_entry(id)?;
        let mut current = entry.submission.lock().await;
        let now = self.clock.now();

        if entry.removed.load(Ordering::SeqCst) {
            return Ok(Outcome::new(current.clone(), OutcomeCode::StaleIgnored));
        }
        let replaceable = self.config.resubmission == ResubmissionPolicy::ReplaceBeforeDue
            && now <= assignment.due_date
            && current.is_untouched();
        if !replaceable {
            debug!(submission_id = %id, "Submission already exists");
            return Ok(Outcome::new(current.clone(), OutcomeCode::AlreadySubmitted));
        }

        let mut replaced = current.clone();
        replaced.content = content;
        replaced.submitted_at = now;
        replaced.late = false;
        self.store.save_submission(&replaced).await?;
        *current = replaced.clone();

        info!(submission_id = %id, "Submission content replaced");
        self.notify(created_event(&replaced, true)).await;
        Ok(Outcome::new(replaced, OutcomeCode::Replaced))
    }

    /// Applies one instructor action. Actions on a removed submission are
    /// dropped with [`OutcomeCode::StaleIgnored`].
    pub async fn review(&self, action: ReviewAction) -> Result<Outcome<Submission>, WorkflowError> {
        let entry = self.submission_entry(action.submission_id)?;
        let mut current = entry.submission.lock().await;
        self.authorize(
            &action.actor_id,
            Permission::Review {
                assignment_id: &current.assignment_id,
            },
        )
        .await?;

        if entry.removed.load(Ordering::SeqCst) {
            debug!(submission_id = %action.submission_id, "Review on removed submission ignored");
            return Ok(Outcome::new(current.clone(), OutcomeCode::StaleIgnored));
        }

        let mut updated = current.clone();
        let transition = ReviewMachine::apply(
            &mut updated,
            &action.kind,
            &action.actor_id,
            entry.total_points,
            self.clock.now(),
        )?;
        if transition == ReviewTransition::Unchanged {
            return Ok(Outcome::new(current.clone(), OutcomeCode::Unchanged));
        }

        self.store.save_submission(&updated).await?;
        *current = updated.clone();

        info!(
            submission_id = %updated.id,
            actor_id = %action.actor_id,
            action = action.kind.name(),
            review_status = %updated.review_status,
            grade = ?updated.grade,
            "Review action applied"
        );
        if let Some(kind) = transition.event_kind() {
            self.notify(WorkflowEvent {
                kind,
                target_user_id: updated.submitter_id.clone(),
                payload: json!({
                    "submission_id": updated.id,
                    "assignment_id": updated.assignment_id,
                    "review_status": updated.review_status,
                    "grade": updated.grade,
                    "feedback": updated.feedback,
                }),
            })
            .await;
        }
        Ok(Outcome::new(updated, transition.code()))
    }

    pub async fn mark_viewed(
        &self,
        actor_id: &str,
        submission_id: Uuid,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        self.review(review_action(actor_id, submission_id, ReviewActionKind::MarkViewed))
            .await
    }

    pub async fn approve_submission(
        &self,
        actor_id: &str,
        submission_id: Uuid,
        feedback: Option<String>,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        self.review(review_action(
            actor_id,
            submission_id,
            ReviewActionKind::Approve { feedback },
        ))
        .await
    }

    pub async fn disapprove_submission(
        &self,
        actor_id: &str,
        submission_id: Uuid,
        feedback: impl Into<String>,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        self.review(review_action(
            actor_id,
            submission_id,
            ReviewActionKind::Disapprove {
                feedback: feedback.into(),
            },
        ))
        .await
    }

    pub async fn grade_submission(
        &self,
        actor_id: &str,
        submission_id: Uuid,
        value: f64,
        feedback: Option<String>,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        self.review(review_action(
            actor_id,
            submission_id,
            ReviewActionKind::Grade { value, feedback },
        ))
        .await
    }

    /// Deletes a submission. The submitter may submit again afterwards.
    pub async fn remove_submission(
        &self,
        actor_id: &str,
        submission_id: Uuid,
    ) -> Result<Outcome<Submission>, WorkflowError> {
        let entry = self.submission_entry(submission_id)?;
        let current = entry.submission.lock().await;
        self.authorize(
            actor_id,
            Permission::Review {
                assignment_id: &current.assignment_id,
            },
        )
        .await?;

        if entry.removed.load(Ordering::SeqCst) {
            return Ok(Outcome::new(current.clone(), OutcomeCode::StaleIgnored));
        }

        self.store.delete_submission(submission_id).await?;
        entry.removed.store(true, Ordering::SeqCst);
        self.submission_slots.remove(&(
            current.assignment_id.clone(),
            current.submitter_id.clone(),
        ));
        info!(submission_id = %submission_id, actor_id, "Submission removed");
        Ok(Outcome::committed(current.clone()))
    }

    pub async fn get_submission(&self, submission_id: Uuid) -> Result<Submission, WorkflowError> {
        let entry = self.submission_entry(submission_id)?;
        if entry.removed.load(Ordering::SeqCst) {
            return Err(WorkflowError::not_found("submission", submission_id));
        }
        let snapshot = entry.submission.lock().await.clone();
        Ok(snapshot)
    }

    fn submission_entry(&self, id: Uuid) -> Result<Arc<SubmissionEntry>, WorkflowError> {
        self.submissions
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| WorkflowError::not_found("submission", id))
    }

    async fn authorize(&self, actor_id: &str, permission: Permission<'_>) -> Result<(), WorkflowError> {
        if self.authorizer.allows(actor_id, permission).await {
            Ok(())
        } else {
            warn!(actor_id, permission = %permission, "Permission denied");
            Err(WorkflowError::Forbidden {
                actor: actor_id.to_string(),
                action: permission.to_string(),
            })
        }
    }

    async fn notify(&self, event: WorkflowEvent) {
        let kind = event.kind;
        if let Err(e) = self.store.emit(event).await {
            warn!(event = ?kind, error = %e, "Failed to emit notification");
        }
    }
}

fn review_action(actor_id: &str, submission_id: Uuid, kind: ReviewActionKind) -> ReviewAction {
    ReviewAction {
        actor_id: actor_id.to_string(),
        submission_id,
        kind,
    }
}

fn created_event(submission: &Submission, replaced: bool) -> WorkflowEvent {
    WorkflowEvent {
        kind: EventKind::SubmissionCreated,
        target_user_id: submission.submitter_id.clone(),
        payload: json!({
            "submission_id": submission.id,
            "assignment_id": submission.assignment_id,
            "late": submission.late,
            "replaced": replaced,
        }),
    }
}
