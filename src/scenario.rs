//! Scripted workflows replayed on virtual time.
//!
//! A [`Scenario`] bundles definitions, a reviewer roster and an ordered
//! list of [`Step`]s. [`replay`] runs them against an in-memory engine
//! whose clock only moves on `advance` steps, so timer races resolve the
//! same way every run. Attempts and submissions are referred to by the
//! alias given when they were created.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::coordinator::WorkflowCoordinator;
use crate::error::WorkflowError;
use crate::memory::{MemoryBackend, RosterAuthorizer};
use crate::model::{AssessmentDefinition, AssignmentDefinition, SubmissionContent};
use crate::sim::VirtualTime;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Virtual start time. Defaults to the wall clock at replay.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// When non-empty, only these actors may review and grade.
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub assessments: Vec<AssessmentDefinition>,
    #[serde(default)]
    pub assignments: Vec<AssignmentDefinition>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualScore {
    pub question: u32,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    StartAttempt {
        alias: String,
        assessment_id: String,
        submitter_id: String,
    },
    Answer {
        attempt: String,
        question: u32,
        text: String,
    },
    SubmitAttempt {
        attempt: String,
    },
    TimeRemaining {
        attempt: String,
    },
    GradeAttempt {
        attempt: String,
        grader_id: String,
        #[serde(default)]
        scores: Vec<ManualScore>,
    },
    Submit {
        alias: String,
        assignment_id: String,
        submitter_id: String,
        #[serde(flatten)]
        content: SubmissionContent,
    },
    MarkViewed {
        submission: String,
        actor_id: String,
    },
    Approve {
        submission: String,
        actor_id: String,
        #[serde(default)]
        feedback: Option<String>,
    },
    Disapprove {
        submission: String,
        actor_id: String,
        #[serde(default)]
        feedback: String,
    },
    Grade {
        submission: String,
        actor_id: String,
        value: f64,
        #[serde(default)]
        feedback: Option<String>,
    },
    Remove {
        submission: String,
        actor_id: String,
    },
    /// Moves virtual time forward, firing any timers that come due.
    Advance {
        millis: u64,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::StartAttempt { .. } => "start_attempt",
            Step::Answer { .. } => "answer",
            Step::SubmitAttempt { .. } => "submit_attempt",
            Step::TimeRemaining { .. } => "time_remaining",
            Step::GradeAttempt { .. } => "grade_attempt",
            Step::Submit { .. } => "submit",
            Step::MarkViewed { .. } => "mark_viewed",
            Step::Approve { .. } => "approve",
            Step::Disapprove { .. } => "disapprove",
            Step::Grade { .. } => "grade",
            Step::Remove { .. } => "remove",
            Step::Advance { .. } => "advance",
        }
    }
}

impl Scenario {
    /// Reads a scenario from JSON (`.json`) or TOML (anything else).
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let scenario = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("invalid JSON scenario {}", path.display()))?
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("invalid TOML scenario {}", path.display()))?
        };
        Ok(scenario)
    }
}

/// What one step produced: the outcome as JSON, or the error it was
/// rejected with. Rejections are part of the script, not replay failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    /// The outcome code, for steps that return one.
    pub fn code(&self) -> Option<&str> {
        self.result.as_ref()?.get("code")?.as_str()
    }
}

/// Runs every step in order. Fails only on a malformed script, e.g. a
/// step naming an alias that was never created.
pub async fn replay(scenario: &Scenario, config: EngineConfig) -> Result<Vec<StepReport>> {
    let backend = Arc::new(MemoryBackend::new());
    for def in &scenario.assessments {
        backend.add_assessment(def.clone());
    }
    for def in &scenario.assignments {
        backend.add_assignment(def.clone());
    }

    let time = Arc::new(VirtualTime::new(scenario.start.unwrap_or_else(Utc::now)));
    let mut engine = WorkflowCoordinator::new(
        backend.clone(),
        backend,
        time.clone(),
        time.clone(),
        config,
    );
    if !scenario.reviewers.is_empty() {
        engine = engine.with_authorizer(Arc::new(RosterAuthorizer::new(
            scenario.reviewers.iter().cloned(),
        )));
    }

    let mut runner = Runner {
        engine,
        time,
        attempts: HashMap::new(),
        submissions: HashMap::new(),
    };
    let mut reports = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let report = runner
            .run(index, step)
            .await
            .with_context(|| format!("step {index} ({})", step.name()))?;
        debug!(index, step = report.step, ok = report.error.is_none(), "Step replayed");
        reports.push(report);
    }
    info!(steps = reports.len(), "Scenario replayed");
    Ok(reports)
}

struct Runner {
    engine: WorkflowCoordinator,
    time: Arc<VirtualTime>,
    attempts: HashMap<String, Uuid>,
    submissions: HashMap<String, Uuid>,
}

impl Runner {
    async fn run(&mut self, index: usize, step: &Step) -> Result<StepReport> {
        let engine = &self.engine;
        let result: Result<Value, WorkflowError> = match step {
            Step::StartAttempt {
                alias,
                assessment_id,
                submitter_id,
            } => {
                let out = engine.start_attempt(assessment_id, submitter_id).await;
                if let Ok(out) = &out {
                    self.attempts.insert(alias.clone(), out.entity.id);
                }
                to_json(out)
            }
            Step::Answer {
                attempt,
                question,
                text,
            } => {
                let id = lookup(&self.attempts, attempt)?;
                to_json(engine.record_answer(id, *question, text).await)
            }
            Step::SubmitAttempt { attempt } => {
                let id = lookup(&self.attempts, attempt)?;
                to_json(engine.submit_attempt(id).await)
            }
            Step::TimeRemaining { attempt } => {
                let id = lookup(&self.attempts, attempt)?;
                engine
                    .get_time_remaining(id)
                    .map(|secs| json!({ "seconds": secs }))
            }
            Step::GradeAttempt {
                attempt,
                grader_id,
                scores,
            } => {
                let id = lookup(&self.attempts, attempt)?;
                let scores: BTreeMap<u32, f64> =
                    scores.iter().map(|s| (s.question, s.points)).collect();
                to_json(engine.grade_attempt(grader_id, id, &scores).await)
            }
            Step::Submit {
                alias,
                assignment_id,
                submitter_id,
                content,
            } => {
                let out = engine
                    .create_submission(assignment_id, submitter_id, content.clone())
                    .await;
                if let Ok(out) = &out {
                    self.submissions.insert(alias.clone(), out.entity.id);
                }
                to_json(out)
            }
            Step::MarkViewed {
                submission,
                actor_id,
            } => {
                let id = lookup(&self.submissions, submission)?;
                to_json(engine.mark_viewed(actor_id, id).await)
            }
            Step::Approve {
                submission,
                actor_id,
                feedback,
            } => {
                let id = lookup(&self.submissions, submission)?;
                to_json(engine.approve_submission(actor_id, id, feedback.clone()).await)
            }
            Step::Disapprove {
                submission,
                actor_id,
                feedback,
            } => {
                let id = lookup(&self.submissions, submission)?;
                to_json(engine.disapprove_submission(actor_id, id, feedback.as_str()).await)
            }
            Step::Grade {
                submission,
                actor_id,
                value,
                feedback,
            } => {
                let id = lookup(&self.submissions, submission)?;
                to_json(
                    engine
                        .grade_submission(actor_id, id, *value, feedback.clone())
                        .await,
                )
            }
            Step::Remove {
                submission,
                actor_id,
            } => {
                let id = lookup(&self.submissions, submission)?;
                to_json(engine.remove_submission(actor_id, id).await)
            }
            Step::Advance { millis } => {
                self.time.advance(Duration::from_millis(*millis)).await;
                Ok(json!({ "now": self.time.now() }))
            }
        };

        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Ok(StepReport {
            index,
            step: step.name(),
            result,
            error,
        })
    }
}

fn lookup(aliases: &HashMap<String, Uuid>, alias: &str) -> Result<Uuid> {
    aliases
        .get(alias)
        .copied()
        .ok_or_else(|| anyhow!("unknown alias '{alias}'"))
}

fn to_json<T: Serialize>(result: Result<T, WorkflowError>) -> Result<Value, WorkflowError> {
    result.and_then(|v| Ok(serde_json::to_value(v)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const QUIZ_TOML: &str = r#"
start = "2025-01-10T12:00:00Z"
reviewers = ["prof"]

[[assessments]]
id = "quiz"
title = "Quiz 1"
total_points = 20.0
time_limit_secs = 60
attempts_allowed = 1
passing_score = 50.0

[[assessments.questions]]
index = 1
points = 10.0
type = "multiple_choice"
options = ["A", "B"]
correct = "A"

[[assessments.questions]]
index = 2
points = 10.0
type = "essay"

[[assignments]]
id = "hw1"
title = "Homework"
due_date = "2025-01-10T23:59:00Z"
total_points = 100.0

[[steps]]
step = "start_attempt"
alias = "a1"
assessment_id = "quiz"
submitter_id = "ana"

[[steps]]
step = "answer"
attempt = "a1"
question = 1
text = "A"

[[steps]]
step = "advance"
millis = 60000

[[steps]]
step = "submit_attempt"
attempt = "a1"

[[steps]]
step = "answer"
attempt = "a1"
question = 2
text = "too late"

[[steps]]
step = "grade_attempt"
attempt = "a1"
grader_id = "prof"
scores = [{ question = 2, points = 7.5 }]

[[steps]]
step = "submit"
alias = "s1"
assignment_id = "hw1"
submitter_id = "ana"
text = "my essay"

[[steps]]
step = "approve"
submission = "s1"
actor_id = "ana"

[[steps]]
step = "disapprove"
submission = "s1"
actor_id = "prof"
feedback = "needs sources"
"#;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn toml_scenario_replays_deterministically() {
        let file = write_temp(".toml", QUIZ_TOML);
        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.steps.len(), 9);

        let reports = replay(&scenario, EngineConfig::default()).await.unwrap();
        let codes: Vec<Option<&str>> = reports.iter().map(StepReport::code).collect();
        assert_eq!(codes[0], Some("committed"));
        assert_eq!(codes[1], Some("committed"));
        // The timer fired during the advance, so the manual submit loses.
        assert_eq!(codes[3], Some("already_finalized"));
        assert_eq!(
            reports[3].result.as_ref().unwrap()["entity"]["finalization"]["reason"],
            "timeout"
        );
        assert_eq!(codes[4], Some("stale_ignored"));
        assert_eq!(codes[5], Some("committed"));
        assert_eq!(
            reports[5].result.as_ref().unwrap()["entity"]["status"],
            "graded"
        );
        assert_eq!(codes[6], Some("committed"));
        assert!(reports[7].error.as_deref().unwrap().contains("ana"));
        assert_eq!(
            reports[8].result.as_ref().unwrap()["entity"]["review_status"],
            "disapproved"
        );
    }

    #[tokio::test]
    async fn json_scenario_loads_by_extension() {
        let json = r#"{
            "start": "2025-01-10T12:00:00Z",
            "assignments": [
                { "id": "hw1", "due_date": "2025-01-10T23:59:00Z", "total_points": 10.0, "title": "" }
            ],
            "steps": [
                { "step": "submit", "alias": "s", "assignment_id": "hw1", "submitter_id": "bo", "url": "https://example.org" },
                { "step": "submit", "alias": "s2", "assignment_id": "hw1", "submitter_id": "bo", "text": "again" },
                { "step": "grade", "submission": "s", "actor_id": "t", "value": 11.0 }
            ]
        }"#;
        let file = write_temp(".json", json);
        let scenario = Scenario::load(file.path()).unwrap();
        let reports = replay(&scenario, EngineConfig::default()).await.unwrap();

        assert_eq!(reports[0].code(), Some("committed"));
        assert_eq!(reports[1].code(), Some("already_submitted"));
        assert!(reports[2].error.is_some());
    }

    #[tokio::test]
    async fn unknown_alias_fails_the_replay() {
        let scenario: Scenario = toml::from_str(
            r#"
[[steps]]
step = "submit_attempt"
attempt = "ghost"
"#,
        )
        .unwrap();
        let err = replay(&scenario, EngineConfig::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown alias 'ghost'"));
    }

    #[test]
    fn missing_file_has_context() {
        let err = Scenario::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read scenario"));
    }
}
