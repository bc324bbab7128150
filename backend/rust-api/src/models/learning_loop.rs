use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option, Accuracy, GradedAttempt};

pub const DEFAULT_CANDIDATES_PER_MISTAKE: usize = 2;
pub const DEFAULT_OPTIONS_PER_CANDIDATE: usize = 4;
pub const DEFAULT_MASTERY_THRESHOLD: Accuracy = Accuracy::from_hundredths(8_000);

/// Product policy shared by the prompt builder, the candidate validator and
/// the mastery check. Changing one figure changes it everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    pub candidates_per_mistake: usize,
    pub options_per_candidate: usize,
    pub mastery_threshold: Accuracy,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            candidates_per_mistake: DEFAULT_CANDIDATES_PER_MISTAKE,
            options_per_candidate: DEFAULT_OPTIONS_PER_CANDIDATE,
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
        }
    }
}

/// One remediation cycle for a (student, test) pair ("learning_loops" collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningLoop {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub test_id: String,
    pub original_attempt_id: String,
    /// Graded test attempts that seeded (or re-armed) this loop.
    #[serde(default)]
    pub attempts: Vec<LoopAttemptRecord>,
    /// Completed practice rounds. Absent on documents written before rounds were tracked.
    #[serde(default)]
    pub ai_practice_attempts: Vec<PracticeSessionRecord>,
    #[serde(default)]
    pub current_attempt: u32,
    #[serde(rename = "totalAIQuestions", default)]
    pub total_ai_questions: u32,
    /// Question ids of the latest generation round only.
    #[serde(default)]
    pub ai_questions: Vec<String>,
    #[serde(rename = "lastAIPracticeAttempt", default)]
    pub last_ai_practice_attempt: u32,
    pub is_active: bool,
    #[serde(default)]
    pub is_mastered: bool,
    #[serde(default = "default_mastery_threshold")]
    pub mastery_threshold: Accuracy,
    #[serde(with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_mastery_threshold() -> Accuracy {
    DEFAULT_MASTERY_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopAttemptRecord {
    pub attempt_number: u32,
    pub attempt_id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub accuracy: Accuracy,
    #[serde(default)]
    pub wrong_question_ids: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LoopAttemptRecord {
    fn from_attempt(attempt_number: u32, attempt: &GradedAttempt) -> Self {
        Self {
            attempt_number,
            attempt_id: attempt.id.clone(),
            score: attempt.score,
            accuracy: attempt.accuracy,
            wrong_question_ids: attempt.wrong_question_ids(),
            completed_at: attempt.completed_at,
        }
    }
}

/// Outcome of one graded practice round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSessionRecord {
    pub attempt_number: u32,
    #[serde(with = "bson_datetime_as_chrono")]
    pub completed_at: DateTime<Utc>,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub accuracy: Accuracy,
    /// Exactly the questions graded in this round.
    #[serde(rename = "aiQuestionIds", default)]
    pub ai_question_ids: Vec<String>,
}

impl LearningLoop {
    pub fn seeded(
        attempt: &GradedAttempt,
        mastery_threshold: Accuracy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: attempt.student_id.clone(),
            test_id: attempt.test_id.clone(),
            original_attempt_id: attempt.id.clone(),
            attempts: vec![LoopAttemptRecord::from_attempt(1, attempt)],
            ai_practice_attempts: Vec::new(),
            current_attempt: 0,
            total_ai_questions: 0,
            ai_questions: Vec::new(),
            last_ai_practice_attempt: 0,
            is_active: true,
            is_mastered: false,
            mastery_threshold,
            started_at: now,
            completed_at: None,
        }
    }

    /// Re-arms an active loop for a fresh review triggered by a new graded attempt.
    /// Tombstoning the open questions is the caller's job.
    pub fn reset_for_attempt(&mut self, attempt: &GradedAttempt) {
        self.ai_questions.clear();
        self.total_ai_questions = 0;
        self.ai_practice_attempts.clear();
        self.current_attempt = 0;
        self.last_ai_practice_attempt = 0;
        self.is_mastered = false;
        self.is_active = true;
        self.completed_at = None;

        if self.original_attempt_id != attempt.id {
            let attempt_number = self.attempts.len() as u32 + 1;
            self.attempts
                .push(LoopAttemptRecord::from_attempt(attempt_number, attempt));
            self.original_attempt_id = attempt.id.clone();
        }
    }

    /// Replaces the current practice set with a freshly generated round.
    pub fn replace_round(&mut self, question_ids: Vec<String>) {
        self.total_ai_questions = question_ids.len() as u32;
        self.ai_questions = question_ids;
    }

    /// Appends a graded round and evaluates mastery on this round's accuracy alone.
    pub fn record_session(
        &mut self,
        graded_ids: Vec<String>,
        correct: u32,
        wrong: u32,
        now: DateTime<Utc>,
    ) -> PracticeSessionRecord {
        let total = correct + wrong;
        let accuracy = Accuracy::from_ratio(correct, total);
        let attempt_number = self.current_attempt + 1;

        let record = PracticeSessionRecord {
            attempt_number,
            completed_at: now,
            total_questions: total,
            correct_answers: correct,
            wrong_answers: wrong,
            accuracy,
            ai_question_ids: graded_ids,
        };
        self.ai_practice_attempts.push(record.clone());
        self.current_attempt = attempt_number;
        self.last_ai_practice_attempt = attempt_number;

        if accuracy.meets(self.mastery_threshold) {
            self.is_mastered = true;
            self.is_active = false;
            self.completed_at = Some(now);
        }

        record
    }

    /// Terminates the loop. Returns false when it was already ended.
    pub fn end(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active && self.completed_at.is_some() {
            return false;
        }
        self.is_active = false;
        self.completed_at.get_or_insert(now);
        true
    }

    pub fn last_session(&self) -> Option<&PracticeSessionRecord> {
        self.ai_practice_attempts.last()
    }
}

/// Listing entry for the student's active loops.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSummary {
    pub id: String,
    pub test_id: String,
    #[serde(rename = "totalAIQuestions")]
    pub total_ai_questions: u32,
    pub current_attempt: u32,
    pub is_active: bool,
    pub is_mastered: bool,
    pub started_at: DateTime<Utc>,
}

impl From<&LearningLoop> for LoopSummary {
    fn from(learning_loop: &LearningLoop) -> Self {
        LoopSummary {
            id: learning_loop.id.clone(),
            test_id: learning_loop.test_id.clone(),
            total_ai_questions: learning_loop.total_ai_questions,
            current_attempt: learning_loop.current_attempt,
            is_active: learning_loop.is_active,
            is_mastered: learning_loop.is_mastered,
            started_at: learning_loop.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptAnswer;

    fn attempt(id: &str, wrong: &[&str]) -> GradedAttempt {
        GradedAttempt {
            id: id.to_string(),
            student_id: "student-1".to_string(),
            test_id: "test-1".to_string(),
            answers: wrong
                .iter()
                .map(|question_id| AttemptAnswer {
                    question_id: question_id.to_string(),
                    selected_answer: Some("wrong".to_string()),
                    is_correct: false,
                    marks_obtained: 0.0,
                })
                .collect(),
            score: 1.0,
            total_questions: 4,
            correct_answers: 1,
            wrong_answers: wrong.len() as u32,
            accuracy: Accuracy::from_ratio(1, 4),
            completed_at: Some(Utc::now()),
            is_completed: true,
        }
    }

    #[test]
    fn seeded_loop_starts_at_round_zero() {
        let learning_loop = LearningLoop::seeded(
            &attempt("a1", &["q1", "q2"]),
            DEFAULT_MASTERY_THRESHOLD,
            Utc::now(),
        );

        assert!(learning_loop.is_active);
        assert_eq!(learning_loop.current_attempt, 0);
        assert!(learning_loop.ai_questions.is_empty());
        assert_eq!(learning_loop.attempts.len(), 1);
        assert_eq!(learning_loop.attempts[0].wrong_question_ids, vec!["q1", "q2"]);
    }

    #[test]
    fn record_session_increments_round_and_checks_mastery_per_round() {
        let mut learning_loop =
            LearningLoop::seeded(&attempt("a1", &["q1"]), DEFAULT_MASTERY_THRESHOLD, Utc::now());

        let record =
            learning_loop.record_session(vec!["p1".into(), "p2".into()], 1, 1, Utc::now());
        assert_eq!(record.attempt_number, 1);
        assert_eq!(record.accuracy, Accuracy::from_hundredths(5_000));
        assert!(!learning_loop.is_mastered);

        learning_loop.record_session(
            vec!["p3".into(), "p4".into(), "p5".into(), "p6".into(), "p7".into()],
            4,
            1,
            Utc::now(),
        );
        assert_eq!(learning_loop.current_attempt, 2);
        assert_eq!(learning_loop.last_ai_practice_attempt, 2);
        assert!(learning_loop.is_mastered);
        assert!(!learning_loop.is_active);
        assert!(learning_loop.completed_at.is_some());
    }

    #[test]
    fn reset_clears_rounds_and_tracks_new_attempt() {
        let mut learning_loop =
            LearningLoop::seeded(&attempt("a1", &["q1"]), DEFAULT_MASTERY_THRESHOLD, Utc::now());
        learning_loop.replace_round(vec!["p1".into(), "p2".into()]);
        learning_loop.record_session(vec!["p1".into()], 0, 1, Utc::now());

        learning_loop.reset_for_attempt(&attempt("a2", &["q3"]));

        assert_eq!(learning_loop.current_attempt, 0);
        assert_eq!(learning_loop.last_ai_practice_attempt, 0);
        assert_eq!(learning_loop.total_ai_questions, 0);
        assert!(learning_loop.ai_questions.is_empty());
        assert!(learning_loop.ai_practice_attempts.is_empty());
        assert_eq!(learning_loop.original_attempt_id, "a2");
        assert_eq!(learning_loop.attempts.len(), 2);
    }

    #[test]
    fn end_is_idempotent() {
        let mut learning_loop =
            LearningLoop::seeded(&attempt("a1", &["q1"]), DEFAULT_MASTERY_THRESHOLD, Utc::now());
        assert!(learning_loop.end(Utc::now()));
        let completed_at = learning_loop.completed_at;
        assert!(!learning_loop.end(Utc::now()));
        assert_eq!(learning_loop.completed_at, completed_at);
    }

    #[test]
    fn legacy_document_without_practice_rounds_deserializes() {
        let document = mongodb::bson::doc! {
            "_id": "loop-1",
            "studentId": "s",
            "testId": "t",
            "originalAttemptId": "a",
            "aiQuestions": ["p1"],
            "totalAIQuestions": 1,
            "isActive": true,
            "startedAt": mongodb::bson::DateTime::from_millis(1_700_000_000_000),
        };
        let learning_loop: LearningLoop = mongodb::bson::from_document(document).unwrap();
        assert!(learning_loop.ai_practice_attempts.is_empty());
        assert_eq!(learning_loop.mastery_threshold, DEFAULT_MASTERY_THRESHOLD);
    }
}
