//! Attempt Controller: one timed quiz attempt from start to exactly one
//! terminal submission.
//!
//! Each attempt owns an answer buffer, an optional deadline timer and a
//! [`TerminalSlot`]. Manual submits and the timer both go through
//! [`AttemptController::finalize`]; whichever takes the slot first commits,
//! the other gets the committed attempt back.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::collaborators::{EventKind, WorkflowEvent, WorkflowStore};
use crate::config::AnswerMatching;
use crate::error::WorkflowError;
use crate::grading::{apply_manual_scores, grade_answers};
use crate::lock;
use crate::model::{AssessmentDefinition, Attempt, AttemptStatus, Finalization, FinalizeReason};
use crate::outcome::{Outcome, OutcomeCode};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::terminal::{Commit, TerminalSlot};

struct AttemptEntry {
    definition: Arc<AssessmentDefinition>,
    state: Mutex<Attempt>,
    slot: TerminalSlot<Finalization>,
    timer: Mutex<Option<TimerHandle>>,
    // Set while a finalize is persisting; answers arriving then are dropped.
    closing: AtomicBool,
}

impl AttemptEntry {
    fn snapshot(&self) -> Attempt {
        lock(&self.state).clone()
    }
}

struct ControllerInner {
    attempts: DashMap<Uuid, Arc<AttemptEntry>>,
    store: Arc<dyn WorkflowStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    matching: AnswerMatching,
}

/// Owns every live attempt, keyed by id. Cheap to clone.
#[derive(Clone)]
pub struct AttemptController {
    inner: Arc<ControllerInner>,
}

impl AttemptController {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        matching: AnswerMatching,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                attempts: DashMap::new(),
                store,
                scheduler,
                clock,
                matching,
            }),
        }
    }

    /// Opens a new attempt after checking the availability window and the
    /// attempt allowance. Nothing is persisted or scheduled on failure.
    pub async fn start(
        &self,
        definition: Arc<AssessmentDefinition>,
        submitter_id: &str,
        prior_attempts: u32,
    ) -> Result<Attempt, WorkflowError> {
        definition.validate()?;
        let now = self.inner.clock.now();

        if let Some(reason) = definition.unavailable_reason(now) {
            return Err(WorkflowError::NotAvailable {
                assessment_id: definition.id.clone(),
                reason,
            });
        }
        if let Some(allowed) = definition.attempts_allowed
            && prior_attempts >= allowed
        {
            return Err(WorkflowError::AttemptsExhausted {
                allowed,
                used: prior_attempts,
            });
        }

        let attempt = Attempt::new(
            definition.id.clone(),
            submitter_id.to_string(),
            prior_attempts + 1,
            now,
            definition.time_limit_secs,
        );
        self.inner.store.save_attempt(&attempt).await?;

        let id = attempt.id;
        let limit = definition.time_limit_secs;
        let entry = Arc::new(AttemptEntry {
            definition,
            state: Mutex::new(attempt.clone()),
            slot: TerminalSlot::new(),
            timer: Mutex::new(None),
            closing: AtomicBool::new(false),
        });
        self.inner.attempts.insert(id, Arc::clone(&entry));

        if let Some(secs) = limit {
            let handle = self
                .inner
                .scheduler
                .schedule_once(Duration::from_secs(secs), self.timeout_task(id));
            *lock(&entry.timer) = Some(handle);
        }

        info!(
            attempt_id = %id,
            assessment_id = %attempt.assessment_id,
            submitter_id,
            attempt_number = attempt.attempt_number,
            time_limit_secs = ?limit,
            "Attempt started"
        );
        Ok(attempt)
    }

    // The task only holds a weak reference so a pending timer never keeps
    // a dropped controller alive.
    fn timeout_task(&self, id: Uuid) -> crate::scheduler::TimerTask {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        Box::pin(async move {
            let Some(inner) = weak.upgrade() else { return };
            let controller = AttemptController { inner };
            if let Err(e) = controller.finalize(id, FinalizeReason::Timeout).await {
                error!(attempt_id = %id, error = %e, "Timeout finalize failed");
            }
        })
    }

    /// Buffers an answer. Writes that arrive after the attempt closed (or
    /// after its deadline) are dropped with [`OutcomeCode::StaleIgnored`].
    pub async fn record_answer(
        &self,
        id: Uuid,
        question_index: u32,
        text: &str,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        let entry = self.entry(id)?;
        if entry.definition.question(question_index).is_none() {
            return Err(WorkflowError::UnknownQuestion(question_index));
        }

        let now = self.inner.clock.now();
        let mut state = lock(&entry.state);
        let past_deadline = state.deadline().is_some_and(|d| now > d);
        if !state.is_open() || past_deadline || entry.closing.load(Ordering::SeqCst) {
            debug!(
                attempt_id = %id,
                question_index,
                status = %state.status,
                "Dropping late answer"
            );
            return Ok(Outcome::new(state.clone(), OutcomeCode::StaleIgnored));
        }

        state.answers.insert(question_index, text.to_string());
        Ok(Outcome::committed(state.clone()))
    }

    /// Closes the attempt. The first caller commits; every later caller,
    /// whatever its reason, gets the committed attempt with
    /// [`OutcomeCode::AlreadyFinalized`].
    pub async fn finalize(
        &self,
        id: Uuid,
        reason: FinalizeReason,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        let entry = self.entry(id)?;
        let commit = entry
            .slot
            .commit_with(|| self.commit_finalization(&entry, reason))
            .await?;

        match commit {
            Commit::Won(_) => Ok(Outcome::committed(entry.snapshot())),
            Commit::Lost(winner) => {
                info!(
                    attempt_id = %id,
                    requested = %reason,
                    committed = %winner.reason,
                    "Finalize lost the race"
                );
                Ok(Outcome::new(entry.snapshot(), OutcomeCode::AlreadyFinalized))
            }
        }
    }

    async fn commit_finalization(
        &self,
        entry: &AttemptEntry,
        reason: FinalizeReason,
    ) -> Result<Finalization, WorkflowError> {
        let now = self.inner.clock.now();
        let finalization = Finalization { reason, at: now };

        // Close the buffer before persisting so no answer can slip in
        // between grading and the write. The closed record is published only
        // once the save lands; a failed or dropped save reopens the buffer.
        let closed = {
            let state = lock(&entry.state);
            entry.closing.store(true, Ordering::SeqCst);
            let mut closed = state.clone();
            closed.status = AttemptStatus::Submitted;
            closed.finalization = Some(finalization);
            closed.submitted_late = reason == FinalizeReason::Manual
                && closed.deadline().is_some_and(|d| now > d);
            closed.result = Some(grade_answers(
                &entry.definition,
                &closed.answers,
                self.inner.matching,
            ));
            closed
        };
        let _reopen = ReopenOnDrop(&entry.closing);

        if let Err(e) = self.inner.store.save_attempt(&closed).await {
            warn!(attempt_id = %closed.id, error = %e, "Finalize not persisted, attempt reopened");
            return Err(e.into());
        }
        *lock(&entry.state) = closed.clone();

        if let Some(handle) = lock(&entry.timer).take()
            && reason == FinalizeReason::Manual
        {
            self.inner.scheduler.cancel(handle);
        }

        let result = closed.result.as_ref();
        info!(
            attempt_id = %closed.id,
            reason = %reason,
            score = ?result.map(|r| r.score),
            late = closed.submitted_late,
            "Attempt finalized"
        );

        self.notify(WorkflowEvent {
            kind: EventKind::AttemptSubmitted,
            target_user_id: closed.submitter_id.clone(),
            payload: json!({
                "attempt_id": closed.id,
                "assessment_id": closed.assessment_id,
                "reason": reason,
                "score": result.map(|r| r.score),
                "percentage": result.map(|r| r.percentage),
                "passed": result.map(|r| r.passed),
                "pending_questions": result.map(|r| r.pending_questions()),
            }),
        })
        .await;

        Ok(finalization)
    }

    /// Records grader points for deferred questions. The attempt becomes
    /// graded once no question is left unmarked; grading again overwrites.
    pub async fn grade(
        &self,
        id: Uuid,
        scores: &BTreeMap<u32, f64>,
    ) -> Result<Outcome<Attempt>, WorkflowError> {
        let entry = self.entry(id)?;
        let current = entry.snapshot();
        let Some(result) = current.result.clone().filter(|_| !current.is_open()) else {
            return Err(WorkflowError::AttemptStillOpen(id.to_string()));
        };

        let result = apply_manual_scores(&entry.definition, result, scores)?;
        let mut updated = current.clone();
        let complete = result.pending_questions().is_empty();
        updated.result = Some(result);
        if complete {
            updated.status = AttemptStatus::Graded;
            updated.graded_at = Some(self.inner.clock.now());
        }

        self.inner.store.save_attempt(&updated).await?;
        *lock(&entry.state) = updated.clone();

        let code = if current.status == AttemptStatus::Graded {
            OutcomeCode::Regraded
        } else {
            OutcomeCode::Committed
        };
        info!(attempt_id = %id, complete, code = %code, "Attempt grade recorded");

        if complete {
            let result = updated.result.as_ref();
            self.notify(WorkflowEvent {
                kind: EventKind::AttemptGraded,
                target_user_id: updated.submitter_id.clone(),
                payload: json!({
                    "attempt_id": id,
                    "score": result.map(|r| r.score),
                    "percentage": result.map(|r| r.percentage),
                    "passed": result.map(|r| r.passed),
                }),
            })
            .await;
        }
        Ok(Outcome::new(updated, code))
    }

    /// Seconds left before the deadline; `None` for untimed attempts.
    pub fn time_remaining(&self, id: Uuid) -> Result<Option<u64>, WorkflowError> {
        let entry = self.entry(id)?;
        let now = self.inner.clock.now();
        Ok(lock(&entry.state).time_remaining(now))
    }

    pub fn get(&self, id: Uuid) -> Result<Attempt, WorkflowError> {
        Ok(self.entry(id)?.snapshot())
    }

    fn entry(&self, id: Uuid) -> Result<Arc<AttemptEntry>, WorkflowError> {
        self.inner
            .attempts
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| WorkflowError::not_found("attempt", id))
    }

    // Delivery is best effort: the transition already landed.
    async fn notify(&self, event: WorkflowEvent) {
        let kind = event.kind;
        if let Err(e) = self.inner.store.emit(event).await {
            warn!(event = ?kind, error = %e, "Failed to emit notification");
        }
    }
}

struct ReopenOnDrop<'a>(&'a AtomicBool);

impl Drop for ReopenOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::memory::MemoryBackend;
    use crate::model::{Question, QuestionKind, Submission};
    use crate::sim::VirtualTime;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::task::JoinSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
    }

    fn mc(index: u32, correct: &str) -> Question {
        Question {
            index,
            prompt: format!("Question {index}"),
            points: 10.0,
            kind: QuestionKind::MultipleChoice {
                options: vec!["A".into(), "B".into(), "C".into()],
                correct: correct.into(),
            },
        }
    }

    fn quiz(limit: Option<u64>) -> Arc<AssessmentDefinition> {
        Arc::new(AssessmentDefinition {
            id: "quiz-1".into(),
            title: "Quiz".into(),
            questions: vec![mc(1, "A"), mc(2, "B"), mc(3, "C")],
            total_points: 30.0,
            time_limit_secs: limit,
            attempts_allowed: Some(2),
            available_from: Some(t0() - chrono::Duration::days(1)),
            available_until: Some(t0() + chrono::Duration::days(1)),
            passing_score: 50.0,
        })
    }

    struct Harness {
        backend: Arc<MemoryBackend>,
        time: Arc<VirtualTime>,
        controller: AttemptController,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let time = Arc::new(VirtualTime::new(t0()));
        let controller = AttemptController::new(
            backend.clone(),
            time.clone(),
            time.clone(),
            AnswerMatching::Exact,
        );
        Harness { backend, time, controller }
    }

    fn submitted_saves(backend: &MemoryBackend, id: Uuid) -> usize {
        backend
            .attempt_saves()
            .iter()
            .filter(|a| a.id == id && a.status == AttemptStatus::Submitted)
            .count()
    }

    #[tokio::test]
    async fn start_persists_and_schedules_timer() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();

        assert_eq!(attempt.status, AttemptStatus::InProgress);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.started_at, t0());
        assert!(h.backend.stored_attempt(attempt.id).is_some());
        assert_eq!(h.time.pending(), 1);
    }

    #[tokio::test]
    async fn untimed_start_schedules_nothing() {
        let h = harness();
        let attempt = h.controller.start(quiz(None), "alice", 0).await.unwrap();
        assert_eq!(h.time.pending(), 0);
        assert_eq!(h.controller.time_remaining(attempt.id).unwrap(), None);
    }

    #[tokio::test]
    async fn start_rejects_exhausted_and_unavailable() {
        let h = harness();
        let err = h.controller.start(quiz(Some(60)), "alice", 2).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AttemptsExhausted { allowed: 2, used: 2 }));

        let mut closed = (*quiz(Some(60))).clone();
        closed.available_until = Some(t0() - chrono::Duration::seconds(1));
        let err = h.controller.start(Arc::new(closed), "alice", 0).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotAvailable { .. }));

        assert!(h.backend.attempt_saves().is_empty());
        assert_eq!(h.time.pending(), 0);
    }

    #[tokio::test]
    async fn failed_start_leaves_nothing_behind() {
        let h = harness();
        h.backend.set_fail_saves(true);
        let err = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Collaborator(_)));
        assert_eq!(h.time.pending(), 0);
        assert!(h.controller.inner.attempts.is_empty());
    }

    #[tokio::test]
    async fn unanswered_questions_count_as_zero() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(600)), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 1, "A").await.unwrap();

        let out = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        let result = out.entity.result.unwrap();
        assert_eq!(out.code, OutcomeCode::Committed);
        assert_eq!(result.score, 10.0);
        assert_eq!(result.percentage, 33);
        assert!(!result.passed);
        assert_eq!(out.entity.status, AttemptStatus::Submitted);
    }

    #[tokio::test]
    async fn answers_overwrite_per_question() {
        let h = harness();
        let attempt = h.controller.start(quiz(None), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 2, "A").await.unwrap();
        let out = h.controller.record_answer(attempt.id, 2, "B").await.unwrap();
        assert_eq!(out.entity.answers.len(), 1);
        assert_eq!(out.entity.answers[&2], "B");

        let err = h.controller.record_answer(attempt.id, 9, "A").await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownQuestion(9)));
    }

    #[tokio::test]
    async fn timer_finalizes_and_late_manual_observes_it() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 1, "A").await.unwrap();

        h.time.advance(Duration::from_secs(60)).await;
        let timed_out = h.controller.get(attempt.id).unwrap();
        assert_eq!(timed_out.status, AttemptStatus::Submitted);
        assert_eq!(timed_out.finalize_reason(), Some(FinalizeReason::Timeout));

        let manual = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(manual.code, OutcomeCode::AlreadyFinalized);
        assert_eq!(manual.entity, timed_out);
        assert_eq!(submitted_saves(&h.backend, attempt.id), 1);
        assert_eq!(h.backend.events_of(EventKind::AttemptSubmitted).len(), 1);
    }

    #[tokio::test]
    async fn manual_submit_at_59_9s_cancels_timer() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();

        h.time.advance(Duration::from_millis(59_900)).await;
        assert_eq!(h.controller.time_remaining(attempt.id).unwrap(), Some(1));
        let manual = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(manual.code, OutcomeCode::Committed);
        assert!(!manual.entity.submitted_late);
        assert_eq!(h.time.pending(), 0);

        h.time.advance(Duration::from_secs(5)).await;
        let after = h.controller.get(attempt.id).unwrap();
        assert_eq!(after.finalize_reason(), Some(FinalizeReason::Manual));
        assert_eq!(after, manual.entity);
        assert_eq!(submitted_saves(&h.backend, attempt.id), 1);
    }

    #[tokio::test]
    async fn answers_after_finalize_are_ignored() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();

        let late = h.controller.record_answer(attempt.id, 1, "A").await.unwrap();
        assert_eq!(late.code, OutcomeCode::StaleIgnored);
        assert!(late.entity.answers.is_empty());
        assert_eq!(late.entity.result.unwrap().score, 0.0);
    }

    #[tokio::test]
    async fn answers_past_deadline_are_ignored_before_timer_runs() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        // Cancel the timer so the clock can pass the deadline with the
        // attempt still open, as if the callback were delayed.
        let handle = lock(&h.controller.entry(attempt.id).unwrap().timer).take().unwrap();
        h.time.cancel(handle);
        h.time.advance(Duration::from_secs(61)).await;

        let out = h.controller.record_answer(attempt.id, 1, "A").await.unwrap();
        assert_eq!(out.code, OutcomeCode::StaleIgnored);

        let manual = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert!(manual.entity.submitted_late);
        assert_eq!(h.controller.time_remaining(attempt.id).unwrap(), Some(0));
    }

    #[tokio::test]
    async fn failed_persist_keeps_attempt_open_for_retry() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 1, "A").await.unwrap();

        h.backend.set_fail_saves(true);
        let err = h.controller.finalize(attempt.id, FinalizeReason::Manual).await;
        assert!(err.is_err());
        let reopened = h.controller.get(attempt.id).unwrap();
        assert!(reopened.is_open());
        assert_eq!(reopened.answers.len(), 1);
        assert_eq!(h.time.pending(), 1);

        h.backend.set_fail_saves(false);
        let out = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(out.code, OutcomeCode::Committed);
        assert_eq!(out.entity.result.unwrap().score, 10.0);
    }

    /// Store whose attempt saves never complete while `stall` is set.
    #[derive(Default)]
    struct StallingStore {
        inner: MemoryBackend,
        stall: AtomicBool,
    }

    #[async_trait]
    impl WorkflowStore for StallingStore {
        async fn save_attempt(&self, attempt: &Attempt) -> Result<(), CollaboratorError> {
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.save_attempt(attempt).await
        }

        async fn save_submission(&self, submission: &Submission) -> Result<(), CollaboratorError> {
            self.inner.save_submission(submission).await
        }

        async fn delete_submission(&self, id: Uuid) -> Result<(), CollaboratorError> {
            self.inner.delete_submission(id).await
        }

        async fn emit(&self, event: WorkflowEvent) -> Result<(), CollaboratorError> {
            self.inner.emit(event).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_finalize_leaves_attempt_open() {
        let store = Arc::new(StallingStore::default());
        let time = Arc::new(VirtualTime::new(t0()));
        let controller = AttemptController::new(
            store.clone(),
            time.clone(),
            time.clone(),
            AnswerMatching::Exact,
        );
        let attempt = controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        controller.record_answer(attempt.id, 1, "A").await.unwrap();

        store.stall.store(true, Ordering::SeqCst);
        let finalize = controller.finalize(attempt.id, FinalizeReason::Manual);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), finalize).await;
        assert!(timed_out.is_err());

        let current = controller.get(attempt.id).unwrap();
        assert!(current.is_open());
        assert!(current.finalization.is_none());
        let answer = controller.record_answer(attempt.id, 2, "B").await.unwrap();
        assert_eq!(answer.code, OutcomeCode::Committed);

        store.stall.store(false, Ordering::SeqCst);
        let out = controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(out.code, OutcomeCode::Committed);
        assert_eq!(out.entity.result.unwrap().score, 20.0);
        assert_eq!(time.pending(), 0);
    }

    #[tokio::test]
    async fn out_of_range_time_limit_is_rejected_at_start() {
        let h = harness();
        for limit in [10_000_000_000_000_000, u64::MAX] {
            let err = h.controller.start(quiz(Some(limit)), "alice", 0).await.unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidDefinition { .. }));
        }
        assert!(h.backend.attempt_saves().is_empty());
        assert_eq!(h.time.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_attempt_is_not_found() {
        let h = harness();
        let id = Uuid::new_v4();
        assert!(matches!(
            h.controller.finalize(id, FinalizeReason::Manual).await,
            Err(WorkflowError::NotFound { kind: "attempt", .. })
        ));
        assert!(h.controller.time_remaining(id).is_err());
    }

    #[tokio::test]
    async fn grading_deferred_questions_completes_attempt() {
        let h = harness();
        let mut def = (*quiz(None)).clone();
        def.questions.push(Question {
            index: 4,
            prompt: "Explain".into(),
            points: 10.0,
            kind: QuestionKind::Essay,
        });
        def.total_points = 40.0;
        let attempt = h.controller.start(Arc::new(def), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 1, "A").await.unwrap();
        h.controller.record_answer(attempt.id, 4, "Because").await.unwrap();

        let early = h.controller.grade(attempt.id, &BTreeMap::new()).await;
        assert!(matches!(early, Err(WorkflowError::AttemptStillOpen(_))));

        let submitted = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(submitted.entity.result.as_ref().unwrap().pending_questions(), vec![4]);

        let partial = h.controller.grade(attempt.id, &BTreeMap::new()).await.unwrap();
        assert_eq!(partial.entity.status, AttemptStatus::Submitted);

        let graded = h.controller.grade(attempt.id, &BTreeMap::from([(4, 8.0)])).await.unwrap();
        assert_eq!(graded.code, OutcomeCode::Committed);
        assert_eq!(graded.entity.status, AttemptStatus::Graded);
        assert_eq!(graded.entity.result.as_ref().unwrap().score, 18.0);
        assert_eq!(h.backend.events_of(EventKind::AttemptGraded).len(), 1);

        let regraded = h.controller.grade(attempt.id, &BTreeMap::from([(4, 10.0)])).await.unwrap();
        assert_eq!(regraded.code, OutcomeCode::Regraded);
        assert_eq!(regraded.entity.result.unwrap().score, 20.0);
        // Grading never reopens the finalize record.
        assert_eq!(regraded.entity.finalization, submitted.entity.finalization);
    }

    #[tokio::test]
    async fn blank_essay_cannot_be_given_credit() {
        let h = harness();
        let mut def = (*quiz(None)).clone();
        def.questions.push(Question {
            index: 4,
            prompt: "Explain".into(),
            points: 10.0,
            kind: QuestionKind::Essay,
        });
        def.total_points = 40.0;
        let attempt = h.controller.start(Arc::new(def), "alice", 0).await.unwrap();
        h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();

        let err = h
            .controller
            .grade(attempt.id, &BTreeMap::from([(4, 10.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnansweredQuestion(4)));

        let graded = h.controller.grade(attempt.id, &BTreeMap::new()).await.unwrap();
        assert_eq!(graded.entity.status, AttemptStatus::Graded);
        assert_eq!(graded.entity.result.unwrap().score, 0.0);
    }

    #[tokio::test]
    async fn emit_failure_does_not_undo_finalize() {
        let h = harness();
        let attempt = h.controller.start(quiz(None), "alice", 0).await.unwrap();
        h.backend.set_fail_emits(true);
        let out = h.controller.finalize(attempt.id, FinalizeReason::Manual).await.unwrap();
        assert_eq!(out.code, OutcomeCode::Committed);
        assert!(h.backend.events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finalize_commits_exactly_once() {
        let h = harness();
        let attempt = h.controller.start(quiz(Some(60)), "alice", 0).await.unwrap();
        h.controller.record_answer(attempt.id, 1, "A").await.unwrap();

        let mut set = JoinSet::new();
        for n in 0..16 {
            let controller = h.controller.clone();
            let reason = if n % 2 == 0 {
                FinalizeReason::Manual
            } else {
                FinalizeReason::Timeout
            };
            set.spawn(async move { controller.finalize(attempt.id, reason).await.unwrap() });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            outcomes.push(joined.unwrap());
        }

        let committed = outcomes.iter().filter(|o| o.code == OutcomeCode::Committed).count();
        assert_eq!(committed, 1);
        let record = &outcomes[0].entity;
        assert!(outcomes.iter().all(|o| o.entity == *record));
        assert_eq!(submitted_saves(&h.backend, attempt.id), 1);
        assert_eq!(h.backend.events_of(EventKind::AttemptSubmitted).len(), 1);
    }
}
