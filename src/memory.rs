//! In-process collaborators used by the CLI and the test suite.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::collaborators::{
    Authorizer, ContentProvider, EventKind, Permission, WorkflowEvent, WorkflowStore,
};
use crate::error::CollaboratorError;
use crate::model::{AssessmentDefinition, AssignmentDefinition, Attempt, Submission};

/// Content provider and store backed by maps. Every `save_*` call is also
/// appended to a log so tests can count writes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    assessments: DashMap<String, AssessmentDefinition>,
    assignments: DashMap<String, AssignmentDefinition>,
    attempts: DashMap<Uuid, Attempt>,
    submissions: DashMap<Uuid, Submission>,
    attempt_log: Mutex<Vec<Attempt>>,
    submission_log: Mutex<Vec<Submission>>,
    events: Mutex<Vec<WorkflowEvent>>,
    fail_saves: AtomicBool,
    fail_emits: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_assessment(&self, def: AssessmentDefinition) {
        self.assessments.insert(def.id.clone(), def);
    }

    pub fn add_assignment(&self, def: AssignmentDefinition) {
        self.assignments.insert(def.id.clone(), def);
    }

    /// Makes every subsequent save fail, to exercise rollback paths.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_emits(&self, fail: bool) {
        self.fail_emits.store(fail, Ordering::SeqCst);
    }

    pub fn stored_attempt(&self, id: Uuid) -> Option<Attempt> {
        self.attempts.get(&id).map(|a| a.clone())
    }

    pub fn stored_submission(&self, id: Uuid) -> Option<Submission> {
        self.submissions.get(&id).map(|s| s.clone())
    }

    pub fn attempt_saves(&self) -> Vec<Attempt> {
        self.attempt_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn submission_saves(&self) -> Vec<Submission> {
        self.submission_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<WorkflowEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    fn check_saves(&self) -> Result<(), CollaboratorError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentProvider for MemoryBackend {
    async fn assessment_definition(
        &self,
        id: &str,
    ) -> Result<Option<AssessmentDefinition>, CollaboratorError> {
        Ok(self.assessments.get(id).map(|d| d.clone()))
    }

    async fn attempt_count(
        &self,
        assessment_id: &str,
        submitter_id: &str,
    ) -> Result<u32, CollaboratorError> {
        let count = self
            .attempts
            .iter()
            .filter(|a| a.assessment_id == assessment_id && a.submitter_id == submitter_id)
            .count();
        Ok(count as u32)
    }

    async fn assignment_definition(
        &self,
        id: &str,
    ) -> Result<Option<AssignmentDefinition>, CollaboratorError> {
        Ok(self.assignments.get(id).map(|d| d.clone()))
    }
}

#[async_trait]
impl WorkflowStore for MemoryBackend {
    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), CollaboratorError> {
        self.check_saves()?;
        self.attempts.insert(attempt.id, attempt.clone());
        if let Ok(mut log) = self.attempt_log.lock() {
            log.push(attempt.clone());
        }
        Ok(())
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), CollaboratorError> {
        self.check_saves()?;
        self.submissions.insert(submission.id, submission.clone());
        if let Ok(mut log) = self.submission_log.lock() {
            log.push(submission.clone());
        }
        Ok(())
    }

    async fn delete_submission(&self, id: Uuid) -> Result<(), CollaboratorError> {
        self.check_saves()?;
        self.submissions.remove(&id);
        Ok(())
    }

    async fn emit(&self, event: WorkflowEvent) -> Result<(), CollaboratorError> {
        if self.fail_emits.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("notifier offline".into()));
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

/// Only listed reviewers may review; taking assessments and submitting is
/// open to everyone.
#[derive(Debug, Default, Clone)]
pub struct RosterAuthorizer {
    reviewers: HashSet<String>,
}

impl RosterAuthorizer {
    pub fn new<I, S>(reviewers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reviewers: reviewers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Authorizer for RosterAuthorizer {
    async fn allows(&self, actor_id: &str, permission: Permission<'_>) -> bool {
        match permission {
            Permission::Review { .. } | Permission::GradeAttempt { .. } => {
                self.reviewers.contains(actor_id)
            }
            Permission::TakeAssessment { .. } | Permission::Submit { .. } => true,
        }
    }
}
