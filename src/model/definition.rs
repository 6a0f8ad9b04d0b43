use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::model::attempt::limit_delta;

/// Answer key for a single question. The grading branch matches on this
/// exhaustively, so adding a kind forces every grader to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
        correct: String,
    },
    TrueFalse {
        correct: bool,
    },
    ShortAnswer {
        #[serde(default)]
        reference: Option<String>,
    },
    Essay,
}

impl QuestionKind {
    /// Objective kinds are graded when the attempt is finalized; the others
    /// wait for an external grader.
    pub fn is_objective(&self) -> bool {
        matches!(
            self,
            QuestionKind::MultipleChoice { .. } | QuestionKind::TrueFalse { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub index: u32,
    #[serde(default)]
    pub prompt: String,
    pub points: f64,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Quiz definition supplied by the content provider. Immutable once handed
/// to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
    pub total_points: f64,
    /// `None` means the assessment is untimed.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    /// `None` means unlimited attempts.
    #[serde(default)]
    pub attempts_allowed: Option<u32>,
    #[serde(default)]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_until: Option<DateTime<Utc>>,
    /// Percentage in 0..=100 needed to pass.
    pub passing_score: f64,
}

impl AssessmentDefinition {
    pub fn question(&self, index: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.index == index)
    }

    /// Returns why the assessment cannot be started at `now`, if it can't.
    pub fn unavailable_reason(&self, now: DateTime<Utc>) -> Option<String> {
        if let Some(from) = self.available_from
            && now < from
        {
            return Some(format!("opens at {}", from.to_rfc3339()));
        }
        if let Some(until) = self.available_until
            && now > until
        {
            return Some(format!("closed at {}", until.to_rfc3339()));
        }
        None
    }

    /// Checks the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidDefinition {
            id: self.id.clone(),
            reason,
        };

        let mut seen = std::collections::HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.index) {
                return Err(invalid(format!("duplicate question index {}", q.index)));
            }
            if !(q.points.is_finite() && q.points >= 0.0) {
                return Err(invalid(format!("question {} has invalid points", q.index)));
            }
            if let QuestionKind::MultipleChoice { options, correct } = &q.kind
                && !options.contains(correct)
            {
                return Err(invalid(format!(
                    "question {} has a correct answer that is not one of its options",
                    q.index
                )));
            }
        }

        let sum: f64 = self.questions.iter().map(|q| q.points).sum();
        if (sum - self.total_points).abs() > 1e-6 {
            return Err(invalid(format!(
                "total points {} does not match question sum {sum}",
                self.total_points
            )));
        }
        if !(0.0..=100.0).contains(&self.passing_score) {
            return Err(invalid(format!(
                "passing score {} is not a percentage",
                self.passing_score
            )));
        }
        if let (Some(from), Some(until)) = (self.available_from, self.available_until)
            && from > until
        {
            return Err(invalid("availability window ends before it starts".into()));
        }
        if let Some(secs) = self.time_limit_secs
            && limit_delta(secs).is_none()
        {
            return Err(invalid(format!("time limit of {secs}s is out of range")));
        }
        Ok(())
    }
}

/// The parts of an assignment the review workflow needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub total_points: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quiz() -> AssessmentDefinition {
        AssessmentDefinition {
            id: "quiz-1".into(),
            title: "Week 1".into(),
            questions: vec![
                Question {
                    index: 1,
                    prompt: "2 + 2".into(),
                    points: 5.0,
                    kind: QuestionKind::MultipleChoice {
                        options: vec!["3".into(), "4".into()],
                        correct: "4".into(),
                    },
                },
                Question {
                    index: 2,
                    prompt: "Explain".into(),
                    points: 5.0,
                    kind: QuestionKind::Essay,
                },
            ],
            total_points: 10.0,
            time_limit_secs: Some(60),
            attempts_allowed: Some(2),
            available_from: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            available_until: Some(Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap()),
            passing_score: 50.0,
        }
    }

    #[test]
    fn valid_definition_passes() {
        assert!(quiz().validate().is_ok());
    }

    #[test]
    fn unrepresentable_time_limit_rejected() {
        for limit in [10_000_000_000_000_000, u64::MAX] {
            let mut def = quiz();
            def.time_limit_secs = Some(limit);
            let err = def.validate().unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidDefinition { .. }));
            assert!(err.to_string().contains("time limit"));
        }
    }

    #[test]
    fn duplicate_index_rejected() {
        let mut def = quiz();
        def.questions[1].index = 1;
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate question index 1"));
    }

    #[test]
    fn total_mismatch_rejected() {
        let mut def = quiz();
        def.total_points = 12.0;
        assert!(matches!(
            def.validate(),
            Err(WorkflowError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn correct_answer_must_be_an_option() {
        let mut def = quiz();
        def.questions[0].kind = QuestionKind::MultipleChoice {
            options: vec!["3".into()],
            correct: "4".into(),
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn availability_window_edges() {
        let def = quiz();
        let before = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let inside = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 1).unwrap();

        assert!(def.unavailable_reason(before).unwrap().starts_with("opens at"));
        assert!(def.unavailable_reason(inside).is_none());
        assert!(def.unavailable_reason(def.available_until.unwrap()).is_none());
        assert!(def.unavailable_reason(after).unwrap().starts_with("closed at"));
    }

    #[test]
    fn question_kind_tagged_json() {
        let json = r#"{"index": 3, "points": 2.0, "type": "true_false", "correct": true}"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.kind, QuestionKind::TrueFalse { correct: true });
        assert!(q.kind.is_objective());
        assert!(!QuestionKind::Essay.is_objective());
    }
}
