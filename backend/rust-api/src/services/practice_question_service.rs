use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::models::{LearningLoop, LoopPolicy, PracticeQuestion, SourceMistake};
use crate::services::question_generator::{
    build_prompt, parse_candidates, Candidate, GenerationError, QuestionGenerator,
};
use crate::services::store::LoopStore;
use crate::utils::retry::{retry_async_when, RetryConfig};

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Upper bound for a single generator call.
    pub timeout: Duration,
    /// Source mistakes generated concurrently.
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            concurrency: 4,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DraftFailure {
    pub source_id: String,
    pub error: GenerationError,
}

/// Questions drafted for one round, grouped per source mistake, not yet stored.
#[derive(Debug, Default)]
pub struct DraftedRound {
    pub groups: Vec<Vec<PracticeQuestion>>,
    pub failures: Vec<DraftFailure>,
}

impl DraftedRound {
    pub fn question_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct GradedAnswers {
    /// Ids graded in this call, ordered by question id.
    pub question_ids: Vec<String>,
    pub correct: u32,
    pub wrong: u32,
}

/// Lifecycle of AI practice questions: drafting, storing, retiring and grading.
pub struct PracticeQuestionService {
    store: Arc<dyn LoopStore>,
    generator: Arc<dyn QuestionGenerator>,
    policy: LoopPolicy,
    settings: GenerationSettings,
}

impl PracticeQuestionService {
    pub fn new(
        store: Arc<dyn LoopStore>,
        generator: Arc<dyn QuestionGenerator>,
        policy: LoopPolicy,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            generator,
            policy,
            settings,
        }
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    /// Asks the generator for every source mistake. A failing mistake lands in
    /// `failures`; the others still produce their group.
    pub async fn draft_round(
        &self,
        learning_loop: &LearningLoop,
        mistakes: &[SourceMistake],
    ) -> DraftedRound {
        let requests: Vec<_> = mistakes
            .iter()
            .map(|mistake| async move { (mistake, self.request_candidates(mistake).await) })
            .collect();
        let results: Vec<_> = stream::iter(requests)
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let now = Utc::now();
        let mut round = DraftedRound::default();
        for (mistake, result) in results {
            match result {
                Ok(candidates) if candidates.is_empty() => {
                    tracing::debug!(
                        source_id = %mistake.source_id,
                        "Generator returned no usable candidates"
                    );
                }
                Ok(candidates) => round.groups.push(
                    candidates
                        .into_iter()
                        .map(|candidate| to_question(learning_loop, mistake, candidate, now))
                        .collect(),
                ),
                Err(error) => round.failures.push(DraftFailure {
                    source_id: mistake.source_id.clone(),
                    error,
                }),
            }
        }
        round
    }

    async fn request_candidates(
        &self,
        mistake: &SourceMistake,
    ) -> Result<Vec<Candidate>, GenerationError> {
        let prompt = build_prompt(mistake, &self.policy);
        let timeout = self.settings.timeout;

        retry_async_when(
            self.settings.retry.clone(),
            GenerationError::is_retryable,
            || async {
                let raw = tokio::time::timeout(timeout, self.generator.generate(&prompt))
                    .await
                    .map_err(|_| GenerationError::timeout(timeout))??;
                parse_candidates(&raw, &self.policy)
            },
        )
        .await
    }

    /// Stores a drafted round one source-mistake group at a time and returns
    /// the stored questions in insertion order.
    pub async fn insert_round(&self, round: DraftedRound) -> Result<Vec<PracticeQuestion>> {
        let mut stored = Vec::with_capacity(round.question_count());
        for group in round.groups {
            self.store.insert_questions(&group).await?;
            stored.extend(group);
        }
        Ok(stored)
    }

    /// Retires the loop's open questions without grading them.
    pub async fn tombstone_open(&self, loop_id: &str) -> Result<u64> {
        self.store.tombstone_unattempted(loop_id).await
    }

    /// Open questions of the loop's current round, in round order.
    pub async fn open_questions(&self, learning_loop: &LearningLoop) -> Result<Vec<PracticeQuestion>> {
        let questions = self.store.find_questions(&learning_loop.ai_questions).await?;
        Ok(questions
            .into_iter()
            .filter(|question| question.learning_loop_id == learning_loop.id && question.is_open())
            .collect())
    }

    /// Wrongly answered questions of the loop's current round.
    pub async fn current_mistakes(
        &self,
        learning_loop: &LearningLoop,
    ) -> Result<Vec<PracticeQuestion>> {
        let questions = self.store.find_questions(&learning_loop.ai_questions).await?;
        Ok(questions
            .into_iter()
            .filter(|question| question.learning_loop_id == learning_loop.id && question.is_wrong())
            .collect())
    }

    /// Grades each answer against its question; unknown ids and questions of
    /// another loop are skipped.
    pub async fn grade(
        &self,
        loop_id: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<GradedAnswers> {
        let mut graded = GradedAnswers::default();

        for (question_id, answer) in answers {
            let Some(mut question) = self.store.find_question(question_id).await? else {
                tracing::debug!(question_id = %question_id, "Skipping unknown practice question");
                continue;
            };
            if question.learning_loop_id != loop_id {
                tracing::warn!(
                    question_id = %question_id,
                    loop_id = %loop_id,
                    "Skipping practice question of another loop"
                );
                continue;
            }

            if question.grade(answer) {
                graded.correct += 1;
            } else {
                graded.wrong += 1;
            }
            self.store.save_question(&question).await?;
            graded.question_ids.push(question.id);
        }

        Ok(graded)
    }
}

fn to_question(
    learning_loop: &LearningLoop,
    mistake: &SourceMistake,
    candidate: Candidate,
    now: chrono::DateTime<Utc>,
) -> PracticeQuestion {
    PracticeQuestion {
        id: PracticeQuestion::new_id(),
        student_id: learning_loop.student_id.clone(),
        original_question_id: mistake.origin_question_id.clone(),
        test_id: learning_loop.test_id.clone(),
        learning_loop_id: learning_loop.id.clone(),
        question_text: candidate.question_text,
        options: candidate.options,
        correct_answer: candidate.correct_answer,
        explanation: candidate.explanation,
        topic: mistake.topic.clone(),
        concept: mistake.concept.clone(),
        difficulty: mistake.difficulty,
        generated_at: now,
        is_attempted: false,
        student_answer: None,
        is_correct: None,
    }
}
