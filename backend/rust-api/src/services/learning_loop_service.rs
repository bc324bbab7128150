//! Learning-loop state machine.
//!
//! A loop is `ACTIVE` from creation until it is mastered or explicitly ended.
//! Each generation round replaces the current practice set; each graded
//! submission appends a session record and re-evaluates mastery on that
//! round alone. Every mutation for a (student, test) pair runs under the
//! pair's lock from `LoopLocks`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::models::{
    distinct_sources, Accuracy, GradedAttempt, LearningLoop, LoopPolicy, PracticeQuestion,
    SourceMistake,
};
use crate::services::errors::LoopError;
use crate::services::loop_events::{LoopEvent, LoopEventSink};
use crate::services::loop_locks::LoopLocks;
use crate::services::practice_question_service::{DraftFailure, PracticeQuestionService};
use crate::services::store::{LoopStore, QuestionBank};

#[derive(Debug)]
pub enum LoopStart {
    /// The attempt had no wrong answers.
    NoLoopNeeded,
    Ready {
        learning_loop: LearningLoop,
        reset: bool,
        tombstoned: u64,
    },
}

#[derive(Debug)]
pub struct RoundReport {
    pub learning_loop_id: String,
    pub source_mistakes: usize,
    pub expected: usize,
    pub questions: Vec<PracticeQuestion>,
    pub failures: Vec<DraftFailure>,
}

impl RoundReport {
    pub fn generated(&self) -> usize {
        self.questions.len()
    }

    pub fn shortfall(&self) -> usize {
        self.expected.saturating_sub(self.generated())
    }
}

#[derive(Debug)]
pub enum RoundOutcome {
    /// Nothing to practise: the mistake source was empty.
    NoMistakes { learning_loop_id: String },
    Generated(RoundReport),
}

#[derive(Debug)]
pub enum AttemptReview {
    NoLoopNeeded,
    Started {
        reset: bool,
        round: RoundOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub learning_loop_id: String,
    pub attempt_number: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub accuracy: Accuracy,
    pub is_mastered: bool,
}

pub struct LearningLoopService {
    store: Arc<dyn LoopStore>,
    bank: Arc<dyn QuestionBank>,
    practice: PracticeQuestionService,
    events: Arc<dyn LoopEventSink>,
    locks: LoopLocks,
}

impl LearningLoopService {
    pub fn new(
        store: Arc<dyn LoopStore>,
        bank: Arc<dyn QuestionBank>,
        practice: PracticeQuestionService,
        events: Arc<dyn LoopEventSink>,
        locks: LoopLocks,
    ) -> Self {
        Self {
            store,
            bank,
            practice,
            events,
            locks,
        }
    }

    fn policy(&self) -> &LoopPolicy {
        self.practice.policy()
    }

    /// Arms a loop for a graded attempt: reuses and resets the active loop of
    /// the (student, test) pair, or creates one.
    pub async fn start_or_reset_loop(
        &self,
        student_id: &str,
        attempt: &GradedAttempt,
    ) -> Result<LoopStart, LoopError> {
        let _guard = self.locks.acquire(student_id, &attempt.test_id).await;
        self.start_or_reset_locked(student_id, attempt).await
    }

    async fn start_or_reset_locked(
        &self,
        student_id: &str,
        attempt: &GradedAttempt,
    ) -> Result<LoopStart, LoopError> {
        if attempt.student_id != student_id {
            return Err(LoopError::forbidden("Unauthorized access"));
        }
        if !attempt.is_completed {
            return Err(LoopError::validation("Test not completed yet"));
        }
        if attempt.wrong_question_ids().is_empty() {
            tracing::info!(attempt_id = %attempt.id, "Perfect score, no learning loop needed");
            return Ok(LoopStart::NoLoopNeeded);
        }

        let existing = self
            .store
            .find_active_loop(student_id, &attempt.test_id)
            .await?;

        let (learning_loop, reset, tombstoned) = match existing {
            Some(mut learning_loop) => {
                let tombstoned = self.practice.tombstone_open(&learning_loop.id).await?;
                learning_loop.reset_for_attempt(attempt);
                self.store.save_loop(&learning_loop).await?;
                (learning_loop, true, tombstoned)
            }
            None => {
                let learning_loop =
                    LearningLoop::seeded(attempt, self.policy().mastery_threshold, Utc::now());
                self.store.insert_loop(&learning_loop).await?;
                (learning_loop, false, 0)
            }
        };

        self.events.emit(LoopEvent::LoopStarted {
            loop_id: learning_loop.id.clone(),
            student_id: learning_loop.student_id.clone(),
            test_id: learning_loop.test_id.clone(),
            reset,
            tombstoned,
        });

        Ok(LoopStart::Ready {
            learning_loop,
            reset,
            tombstoned,
        })
    }

    /// Loads the attempt, arms the loop and generates the first round from the
    /// attempt's wrong answers, all under one lock.
    pub async fn start_from_attempt(
        &self,
        student_id: &str,
        attempt_id: &str,
    ) -> Result<AttemptReview, LoopError> {
        let attempt = self
            .bank
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| LoopError::not_found("Attempt not found"))?;

        let _guard = self.locks.acquire(student_id, &attempt.test_id).await;

        let (learning_loop, reset) = match self.start_or_reset_locked(student_id, &attempt).await? {
            LoopStart::NoLoopNeeded => return Ok(AttemptReview::NoLoopNeeded),
            LoopStart::Ready {
                learning_loop,
                reset,
                ..
            } => (learning_loop, reset),
        };

        let mistakes = self.attempt_mistakes(&attempt).await?;
        if mistakes.is_empty() {
            // Every wrong answer points at a deleted question: the loop is armed
            // but this round has nothing to generate from.
            let round = RoundOutcome::Generated(RoundReport {
                learning_loop_id: learning_loop.id,
                source_mistakes: 0,
                expected: 0,
                questions: Vec::new(),
                failures: Vec::new(),
            });
            return Ok(AttemptReview::Started { reset, round });
        }
        let round = self.generate_round_locked(learning_loop, mistakes).await?;
        Ok(AttemptReview::Started { reset, round })
    }

    async fn attempt_mistakes(&self, attempt: &GradedAttempt) -> Result<Vec<SourceMistake>, LoopError> {
        let domain = self
            .bank
            .get_test(&attempt.test_id)
            .await?
            .map(|test| test.domain)
            .unwrap_or_default();

        let mut mistakes = Vec::new();
        for question_id in attempt.wrong_question_ids() {
            match self.bank.get_canonical_question(&question_id).await? {
                Some(question) => mistakes.push(SourceMistake::from_canonical(&question, &domain)),
                None => {
                    tracing::warn!(
                        question_id = %question_id,
                        attempt_id = %attempt.id,
                        "Original question not found, skipping"
                    );
                }
            }
        }
        Ok(mistakes)
    }

    /// Generates the next round from the wrong answers of the loop's current round.
    pub async fn generate_from_practice(
        &self,
        student_id: &str,
        loop_id: &str,
    ) -> Result<RoundOutcome, LoopError> {
        let learning_loop = self.load_owned_loop(student_id, loop_id).await?;
        let _guard = self
            .locks
            .acquire(&learning_loop.student_id, &learning_loop.test_id)
            .await;
        let learning_loop = self.reload(&learning_loop.id).await?;

        let mistakes = self
            .practice
            .current_mistakes(&learning_loop)
            .await?
            .iter()
            .map(SourceMistake::from_practice)
            .collect();
        self.generate_round_locked(learning_loop, mistakes).await
    }

    /// Replaces the loop's practice set with questions generated for `mistakes`.
    pub async fn generate_round(
        &self,
        learning_loop: &LearningLoop,
        mistakes: Vec<SourceMistake>,
    ) -> Result<RoundOutcome, LoopError> {
        let _guard = self
            .locks
            .acquire(&learning_loop.student_id, &learning_loop.test_id)
            .await;
        let current = self.reload(&learning_loop.id).await?;
        self.generate_round_locked(current, mistakes).await
    }

    async fn generate_round_locked(
        &self,
        mut learning_loop: LearningLoop,
        mistakes: Vec<SourceMistake>,
    ) -> Result<RoundOutcome, LoopError> {
        if !learning_loop.is_active {
            return Err(LoopError::already_completed("Learning loop is no longer active"));
        }

        let mistakes = distinct_sources(mistakes);
        if mistakes.is_empty() {
            return Ok(RoundOutcome::NoMistakes {
                learning_loop_id: learning_loop.id,
            });
        }

        let expected = mistakes.len() * self.policy().candidates_per_mistake;
        let drafted = self.practice.draft_round(&learning_loop, &mistakes).await;
        let failures = drafted.failures.clone();

        for failure in &failures {
            self.events.emit(LoopEvent::GenerationFailed {
                loop_id: learning_loop.id.clone(),
                source_id: failure.source_id.clone(),
                kind: failure.error.kind,
                message: failure.error.message.clone(),
            });
        }

        self.practice.tombstone_open(&learning_loop.id).await?;
        let questions = self.practice.insert_round(drafted).await?;

        learning_loop.replace_round(questions.iter().map(|q| q.id.clone()).collect());
        self.store.save_loop(&learning_loop).await?;

        let report = RoundReport {
            learning_loop_id: learning_loop.id.clone(),
            source_mistakes: mistakes.len(),
            expected,
            questions,
            failures,
        };

        self.events.emit(LoopEvent::RoundGenerated {
            loop_id: report.learning_loop_id.clone(),
            source_mistakes: report.source_mistakes,
            expected: report.expected,
            generated: report.generated(),
        });

        Ok(RoundOutcome::Generated(report))
    }

    /// Grades a round of answers and evaluates mastery on this round alone.
    pub async fn grade_submission(
        &self,
        student_id: &str,
        loop_id: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<SubmissionOutcome, LoopError> {
        let learning_loop = self.load_owned_loop(student_id, loop_id).await?;
        let _guard = self
            .locks
            .acquire(&learning_loop.student_id, &learning_loop.test_id)
            .await;
        let mut learning_loop = self.reload(&learning_loop.id).await?;

        if !learning_loop.is_active {
            return Err(LoopError::already_completed("Learning loop already completed"));
        }

        let graded = self.practice.grade(&learning_loop.id, answers).await?;
        let record =
            learning_loop.record_session(graded.question_ids, graded.correct, graded.wrong, Utc::now());
        self.store.save_loop(&learning_loop).await?;

        self.events.emit(LoopEvent::SubmissionGraded {
            loop_id: learning_loop.id.clone(),
            attempt_number: record.attempt_number,
            correct: record.correct_answers,
            wrong: record.wrong_answers,
            accuracy: record.accuracy,
            mastered: learning_loop.is_mastered,
        });
        if learning_loop.is_mastered {
            self.events.emit(LoopEvent::MasteryAchieved {
                loop_id: learning_loop.id.clone(),
                attempt_number: record.attempt_number,
                accuracy: record.accuracy,
            });
        }

        Ok(SubmissionOutcome {
            learning_loop_id: learning_loop.id,
            attempt_number: record.attempt_number,
            total_questions: record.total_questions,
            correct_answers: record.correct_answers,
            wrong_answers: record.wrong_answers,
            accuracy: record.accuracy,
            is_mastered: learning_loop.is_mastered,
        })
    }

    /// Terminates the loop regardless of mastery. Ending twice is a no-op.
    pub async fn end_loop(&self, student_id: &str, loop_id: &str) -> Result<LearningLoop, LoopError> {
        let learning_loop = self.load_owned_loop(student_id, loop_id).await?;
        let _guard = self
            .locks
            .acquire(&learning_loop.student_id, &learning_loop.test_id)
            .await;
        let mut learning_loop = self.reload(&learning_loop.id).await?;

        if learning_loop.end(Utc::now()) {
            self.store.save_loop(&learning_loop).await?;
            self.events.emit(LoopEvent::LoopEnded {
                loop_id: learning_loop.id.clone(),
            });
        }
        Ok(learning_loop)
    }

    pub async fn current_questions(
        &self,
        student_id: &str,
        loop_id: &str,
    ) -> Result<Vec<PracticeQuestion>, LoopError> {
        let learning_loop = self.load_owned_loop(student_id, loop_id).await?;
        Ok(self.practice.open_questions(&learning_loop).await?)
    }

    pub async fn list_active_loops(&self, student_id: &str) -> Result<Vec<LearningLoop>, LoopError> {
        Ok(self.store.list_active_loops(student_id).await?)
    }

    /// Loads a loop and checks that `student_id` owns it.
    pub async fn load_owned_loop(
        &self,
        student_id: &str,
        loop_id: &str,
    ) -> Result<LearningLoop, LoopError> {
        let learning_loop = self
            .store
            .find_loop(loop_id)
            .await?
            .ok_or_else(|| LoopError::not_found("Learning loop not found"))?;

        if learning_loop.student_id != student_id {
            return Err(LoopError::forbidden("Unauthorized access"));
        }
        Ok(learning_loop)
    }

    async fn reload(&self, loop_id: &str) -> Result<LearningLoop, LoopError> {
        self.store
            .find_loop(loop_id)
            .await?
            .ok_or_else(|| LoopError::not_found("Learning loop not found"))
    }
}
