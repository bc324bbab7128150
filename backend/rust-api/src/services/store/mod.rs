//! Document-store boundary for the learning loop.
//!
//! `QuestionBank` is the read-only view of graded attempts, tests and canonical
//! questions. `LoopStore` owns loops and AI-generated practice questions.
//! Both are implemented over MongoDB for production and in memory for tests
//! and local runs.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CanonicalQuestion, GradedAttempt, LearningLoop, PracticeQuestion, TestRecord};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub const ATTEMPTS_COLLECTION: &str = "attempts";
pub const TESTS_COLLECTION: &str = "tests";
pub const QUESTIONS_COLLECTION: &str = "questions";
pub const LOOPS_COLLECTION: &str = "learning_loops";
pub const PRACTICE_QUESTIONS_COLLECTION: &str = "practice_questions";

#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<GradedAttempt>>;

    async fn get_test(&self, test_id: &str) -> Result<Option<TestRecord>>;

    async fn get_canonical_question(&self, question_id: &str) -> Result<Option<CanonicalQuestion>>;
}

#[async_trait]
pub trait LoopStore: Send + Sync {
    async fn find_loop(&self, loop_id: &str) -> Result<Option<LearningLoop>>;

    async fn find_active_loop(&self, student_id: &str, test_id: &str)
        -> Result<Option<LearningLoop>>;

    /// Active, non-mastered loops of a student, newest first.
    async fn list_active_loops(&self, student_id: &str) -> Result<Vec<LearningLoop>>;

    async fn insert_loop(&self, learning_loop: &LearningLoop) -> Result<()>;

    async fn save_loop(&self, learning_loop: &LearningLoop) -> Result<()>;

    async fn find_question(&self, question_id: &str) -> Result<Option<PracticeQuestion>>;

    /// Questions with the given ids, in the order of `ids`; unknown ids are skipped.
    async fn find_questions(&self, ids: &[String]) -> Result<Vec<PracticeQuestion>>;

    async fn find_unattempted(&self, loop_id: &str) -> Result<Vec<PracticeQuestion>>;

    async fn insert_questions(&self, questions: &[PracticeQuestion]) -> Result<()>;

    async fn save_question(&self, question: &PracticeQuestion) -> Result<()>;

    /// Flags every open question of the loop as attempted without grading it.
    /// Returns how many were retired.
    async fn tombstone_unattempted(&self, loop_id: &str) -> Result<u64>;
}
