use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bson_datetime_as_chrono;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    #[serde(rename = "isCorrect", default)]
    pub is_correct: bool,
}

/// AI-generated practice question stored in the "practice_questions" collection.
///
/// `is_attempted` doubles as a tombstone: questions superseded by a newer round
/// are flipped to attempted without `student_answer` or `is_correct`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQuestion {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    /// Canonical test question this one was derived from, never another practice question.
    pub original_question_id: String,
    pub test_id: String,
    pub learning_loop_id: String,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub topic: String,
    pub concept: String,
    pub difficulty: Difficulty,
    #[serde(with = "bson_datetime_as_chrono")]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

impl PracticeQuestion {
    /// Records a graded answer. Exact string comparison against `correct_answer`.
    pub fn grade(&mut self, answer: &str) -> bool {
        let is_correct = answer == self.correct_answer;
        self.student_answer = Some(answer.to_string());
        self.is_correct = Some(is_correct);
        self.is_attempted = true;
        is_correct
    }

    pub fn is_open(&self) -> bool {
        !self.is_attempted
    }

    pub fn is_wrong(&self) -> bool {
        self.is_attempted && self.is_correct == Some(false)
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Answer-stripped view of an open practice question.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQuestionView {
    pub id: String,
    pub question_text: String,
    pub options: Vec<OptionView>,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct OptionView {
    pub text: String,
}

impl From<&PracticeQuestion> for PracticeQuestionView {
    fn from(question: &PracticeQuestion) -> Self {
        PracticeQuestionView {
            id: question.id.clone(),
            question_text: question.question_text.clone(),
            options: question
                .options
                .iter()
                .map(|option| OptionView {
                    text: option.text.clone(),
                })
                .collect(),
            topic: question.topic.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PracticeQuestion {
        PracticeQuestion {
            id: "pq-1".to_string(),
            student_id: "student".to_string(),
            original_question_id: "q-1".to_string(),
            test_id: "test".to_string(),
            learning_loop_id: "loop".to_string(),
            question_text: "What does HTTP 404 mean?".to_string(),
            options: vec![
                QuestionOption {
                    text: "Not Found".to_string(),
                    is_correct: true,
                },
                QuestionOption {
                    text: "Forbidden".to_string(),
                    is_correct: false,
                },
            ],
            correct_answer: "Not Found".to_string(),
            explanation: Some("404 is Not Found".to_string()),
            topic: "HTTP".to_string(),
            concept: "Status codes".to_string(),
            difficulty: Difficulty::Easy,
            generated_at: Utc::now(),
            is_attempted: false,
            student_answer: None,
            is_correct: None,
        }
    }

    #[test]
    fn grading_is_exact_match() {
        let mut question = sample();
        assert!(!question.grade("not found"));
        assert_eq!(question.is_correct, Some(false));
        assert!(question.is_wrong());

        assert!(question.grade("Not Found"));
        assert_eq!(question.student_answer.as_deref(), Some("Not Found"));
        assert!(question.is_attempted);
    }

    #[test]
    fn view_strips_answers() {
        let question = sample();
        let json = serde_json::to_value(PracticeQuestionView::from(&question)).unwrap();
        assert_eq!(json["questionText"], "What does HTTP 404 mean?");
        assert_eq!(json["options"][0], serde_json::json!({ "text": "Not Found" }));
        assert!(json.get("correctAnswer").is_none());
        assert!(json.get("explanation").is_none());
        assert!(json["options"][0].get("isCorrect").is_none());
    }
}
