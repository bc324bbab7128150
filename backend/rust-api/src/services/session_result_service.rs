use std::sync::Arc;

use serde::Serialize;

use crate::models::{Accuracy, LearningLoop, PracticeQuestion};
use crate::services::errors::LoopError;
use crate::services::store::LoopStore;

const NOT_ANSWERED: &str = "Not Answered";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeView {
    pub question_text: String,
    pub student_answer: String,
    pub correct_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub topic: String,
}

impl From<&PracticeQuestion> for MistakeView {
    fn from(question: &PracticeQuestion) -> Self {
        MistakeView {
            question_text: question.question_text.clone(),
            student_answer: question
                .student_answer
                .clone()
                .unwrap_or_else(|| NOT_ANSWERED.to_string()),
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
            topic: question.topic.clone(),
        }
    }
}

/// Result of the most recently completed practice round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub correct_answers: u32,
    pub wrong_count: u32,
    pub total_questions: u32,
    pub accuracy: Accuracy,
    pub is_mastered: bool,
    pub attempt_number: u32,
    pub mistakes: Vec<MistakeView>,
}

pub struct SessionResultService {
    store: Arc<dyn LoopStore>,
}

impl SessionResultService {
    pub fn new(store: Arc<dyn LoopStore>) -> Self {
        Self { store }
    }

    pub async fn last_session(&self, learning_loop: &LearningLoop) -> Result<SessionResult, LoopError> {
        match learning_loop.last_session() {
            Some(session) => {
                let questions = self.round_questions(learning_loop, &session.ai_question_ids).await?;
                Ok(SessionResult {
                    correct_answers: session.correct_answers,
                    wrong_count: session.wrong_answers,
                    total_questions: session.total_questions,
                    accuracy: session.accuracy,
                    is_mastered: learning_loop.is_mastered,
                    attempt_number: session.attempt_number,
                    mistakes: mistakes_of(&questions),
                })
            }
            // Loops written before session records existed only know their current set.
            None => {
                let questions = self.round_questions(learning_loop, &learning_loop.ai_questions).await?;
                let correct = questions
                    .iter()
                    .filter(|question| question.is_correct == Some(true))
                    .count() as u32;
                let total = questions.len() as u32;
                let mistakes = mistakes_of(&questions);

                Ok(SessionResult {
                    correct_answers: correct,
                    wrong_count: mistakes.len() as u32,
                    total_questions: total,
                    accuracy: Accuracy::from_ratio(correct, total),
                    is_mastered: learning_loop.is_mastered,
                    attempt_number: learning_loop.current_attempt,
                    mistakes,
                })
            }
        }
    }

    /// Attempted questions of the loop among `ids`.
    async fn round_questions(
        &self,
        learning_loop: &LearningLoop,
        ids: &[String],
    ) -> Result<Vec<PracticeQuestion>, LoopError> {
        let questions = self.store.find_questions(ids).await?;
        Ok(questions
            .into_iter()
            .filter(|question| question.learning_loop_id == learning_loop.id && question.is_attempted)
            .collect())
    }
}

fn mistakes_of(questions: &[PracticeQuestion]) -> Vec<MistakeView> {
    questions
        .iter()
        .filter(|question| question.is_correct != Some(true))
        .map(MistakeView::from)
        .collect()
}
