use super::{CanonicalQuestion, Difficulty, PracticeQuestion};

pub const DEFAULT_TOPIC: &str = "General";
pub const DEFAULT_CONCEPT: &str = "Core concept";

/// A wrong answer used as the seed for a generation round.
///
/// Built either from the original graded attempt (canonical question + test
/// domain) or from a wrongly answered practice question of the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMistake {
    /// Identity of the wrong answer itself; used to keep the source list distinct.
    pub source_id: String,
    /// Canonical question every generated question is traced back to.
    pub origin_question_id: String,
    pub question_text: String,
    pub correct_answer: String,
    pub topic: String,
    pub concept: String,
    pub difficulty: Difficulty,
    pub domain: Option<String>,
}

impl SourceMistake {
    pub fn from_canonical(question: &CanonicalQuestion, domain: &str) -> Self {
        SourceMistake {
            source_id: question.id.clone(),
            origin_question_id: question.id.clone(),
            question_text: question.question_text.clone(),
            correct_answer: question.correct_answer.clone(),
            topic: non_blank(question.topic.as_deref()).unwrap_or(DEFAULT_TOPIC).to_string(),
            concept: non_blank(question.concept.as_deref())
                .unwrap_or(DEFAULT_CONCEPT)
                .to_string(),
            difficulty: question.difficulty,
            domain: non_blank(Some(domain)).map(str::to_string),
        }
    }

    pub fn from_practice(question: &PracticeQuestion) -> Self {
        SourceMistake {
            source_id: question.id.clone(),
            origin_question_id: question.original_question_id.clone(),
            question_text: question.question_text.clone(),
            correct_answer: question.correct_answer.clone(),
            topic: non_blank(Some(question.topic.as_str()))
                .unwrap_or(DEFAULT_TOPIC)
                .to_string(),
            concept: non_blank(Some(question.concept.as_str()))
                .unwrap_or(DEFAULT_CONCEPT)
                .to_string(),
            difficulty: question.difficulty,
            domain: None,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Drops repeated sources, keeping the first occurrence.
pub fn distinct_sources(mistakes: Vec<SourceMistake>) -> Vec<SourceMistake> {
    let mut seen = std::collections::HashSet::new();
    mistakes
        .into_iter()
        .filter(|mistake| seen.insert(mistake.source_id.clone()))
        .collect()
}
