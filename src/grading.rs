//! Scoring of finalized attempts.
//!
//! Objective questions are marked against the definition's answer key.
//! Short-answer and essay questions stay unmarked until a grader supplies
//! points through [`apply_manual_scores`].

use std::collections::BTreeMap;

use crate::config::AnswerMatching;
use crate::error::WorkflowError;
use crate::model::{AssessmentDefinition, AttemptResult, QuestionKind, QuestionResult};

/// Marks every question of `def` against `answers`. Unanswered questions
/// get zero credit, including deferred kinds.
pub fn grade_answers(
    def: &AssessmentDefinition,
    answers: &BTreeMap<u32, String>,
    matching: AnswerMatching,
) -> AttemptResult {
    let questions = def
        .questions
        .iter()
        .map(|q| {
            let answer = answers.get(&q.index).filter(|a| !a.trim().is_empty());
            let awarded = match (answer, &q.kind) {
                (None, _) => Some(0.0),
                (Some(given), QuestionKind::MultipleChoice { correct, .. }) => {
                    Some(credit(answer_matches(given, correct, matching), q.points))
                }
                (Some(given), QuestionKind::TrueFalse { correct }) => {
                    let expected = if *correct { "true" } else { "false" };
                    Some(credit(answer_matches(given, expected, matching), q.points))
                }
                (Some(_), QuestionKind::ShortAnswer { .. } | QuestionKind::Essay) => None,
            };
            QuestionResult {
                index: q.index,
                points: q.points,
                awarded,
                answered: answer.is_some(),
            }
        })
        .collect();

    summarize(def, questions)
}

/// Applies grader-supplied points to deferred questions and recomputes the
/// totals. Already-marked objective questions cannot be overridden here.
pub fn apply_manual_scores(
    def: &AssessmentDefinition,
    mut result: AttemptResult,
    scores: &BTreeMap<u32, f64>,
) -> Result<AttemptResult, WorkflowError> {
    // Validate everything before touching anything.
    for (&index, &value) in scores {
        let question = def
            .question(index)
            .ok_or(WorkflowError::UnknownQuestion(index))?;
        if question.kind.is_objective() {
            return Err(WorkflowError::UnknownQuestion(index));
        }
        let answered = result
            .questions
            .iter()
            .any(|q| q.index == index && q.answered);
        if !answered {
            return Err(WorkflowError::UnansweredQuestion(index));
        }
        if !(value.is_finite() && (0.0..=question.points).contains(&value)) {
            return Err(WorkflowError::GradeOutOfRange {
                value,
                max: question.points,
            });
        }
    }

    for q in result.questions.iter_mut() {
        if let Some(&value) = scores.get(&q.index) {
            q.awarded = Some(value);
        }
    }
    Ok(summarize(def, result.questions))
}

fn summarize(def: &AssessmentDefinition, questions: Vec<QuestionResult>) -> AttemptResult {
    let score: f64 = questions.iter().filter_map(|q| q.awarded).sum();
    let total = def.total_points;
    let (percentage, passed) = if total > 0.0 {
        (
            (score / total * 100.0).round() as u32,
            score * 100.0 >= def.passing_score * total,
        )
    } else {
        (0, def.passing_score <= 0.0)
    };

    AttemptResult {
        score,
        total_points: total,
        percentage,
        passed,
        questions,
    }
}

fn answer_matches(given: &str, expected: &str, matching: AnswerMatching) -> bool {
    match matching {
        AnswerMatching::Exact => given == expected,
        AnswerMatching::CaseInsensitive => given.trim().to_lowercase() == expected.trim().to_lowercase(),
    }
}

fn credit(correct: bool, points: f64) -> f64 {
    if correct { points } else { 0.0 }
}
