use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{bson_datetime_as_chrono_option, Accuracy, Difficulty, QuestionOption};

/// Graded test attempt ("attempts" collection). Read-only for the learning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub test_id: String,
    #[serde(default)]
    pub answers: Vec<AttemptAnswer>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub correct_answers: u32,
    #[serde(default)]
    pub wrong_answers: u32,
    #[serde(default)]
    pub accuracy: Accuracy,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_completed: bool,
}

impl GradedAttempt {
    /// Distinct ids of wrongly answered questions, in answer order.
    pub fn wrong_question_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for answer in self.answers.iter().filter(|answer| !answer.is_correct) {
            if !ids.contains(&answer.question_id) {
                ids.push(answer.question_id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptAnswer {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_answer: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub marks_obtained: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub difficulty: Difficulty,
}

/// Canonical question from the question bank ("questions" collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub test_id: String,
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
}
