use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{LoopStore, QuestionBank};
use crate::models::{CanonicalQuestion, GradedAttempt, LearningLoop, PracticeQuestion, TestRecord};

/// In-process store used by tests and `LEARNLOOP_STORE=memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    attempts: RwLock<HashMap<String, GradedAttempt>>,
    tests: RwLock<HashMap<String, TestRecord>>,
    canonical: RwLock<HashMap<String, CanonicalQuestion>>,
    loops: RwLock<HashMap<String, LearningLoop>>,
    // Insertion order is kept so listings stay deterministic.
    questions: RwLock<Vec<PracticeQuestion>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_attempt(&self, attempt: GradedAttempt) {
        self.attempts.write().await.insert(attempt.id.clone(), attempt);
    }

    pub async fn put_test(&self, test: TestRecord) {
        self.tests.write().await.insert(test.id.clone(), test);
    }

    pub async fn put_canonical_question(&self, question: CanonicalQuestion) {
        self.canonical
            .write()
            .await
            .insert(question.id.clone(), question);
    }

    /// Every practice question of a loop, including tombstoned ones.
    pub async fn questions_for_loop(&self, loop_id: &str) -> Vec<PracticeQuestion> {
        self.questions
            .read()
            .await
            .iter()
            .filter(|question| question.learning_loop_id == loop_id)
            .cloned()
            .collect()
    }

    pub async fn loop_count(&self) -> usize {
        self.loops.read().await.len()
    }

    pub async fn question_count(&self) -> usize {
        self.questions.read().await.len()
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<GradedAttempt>> {
        Ok(self.attempts.read().await.get(attempt_id).cloned())
    }

    async fn get_test(&self, test_id: &str) -> Result<Option<TestRecord>> {
        Ok(self.tests.read().await.get(test_id).cloned())
    }

    async fn get_canonical_question(&self, question_id: &str) -> Result<Option<CanonicalQuestion>> {
        Ok(self.canonical.read().await.get(question_id).cloned())
    }
}

#[async_trait]
impl LoopStore for MemoryStore {
    async fn find_loop(&self, loop_id: &str) -> Result<Option<LearningLoop>> {
        Ok(self.loops.read().await.get(loop_id).cloned())
    }

    async fn find_active_loop(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<Option<LearningLoop>> {
        Ok(self
            .loops
            .read()
            .await
            .values()
            .find(|l| l.student_id == student_id && l.test_id == test_id && l.is_active)
            .cloned())
    }

    async fn list_active_loops(&self, student_id: &str) -> Result<Vec<LearningLoop>> {
        let mut loops: Vec<LearningLoop> = self
            .loops
            .read()
            .await
            .values()
            .filter(|l| l.student_id == student_id && l.is_active && !l.is_mastered)
            .cloned()
            .collect();
        loops.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(loops)
    }

    async fn insert_loop(&self, learning_loop: &LearningLoop) -> Result<()> {
        let mut loops = self.loops.write().await;
        if loops.contains_key(&learning_loop.id) {
            return Err(anyhow!("Duplicate learning loop id {}", learning_loop.id));
        }
        loops.insert(learning_loop.id.clone(), learning_loop.clone());
        Ok(())
    }

    async fn save_loop(&self, learning_loop: &LearningLoop) -> Result<()> {
        self.loops
            .write()
            .await
            .insert(learning_loop.id.clone(), learning_loop.clone());
        Ok(())
    }

    async fn find_question(&self, question_id: &str) -> Result<Option<PracticeQuestion>> {
        Ok(self
            .questions
            .read()
            .await
            .iter()
            .find(|question| question.id == question_id)
            .cloned())
    }

    async fn find_questions(&self, ids: &[String]) -> Result<Vec<PracticeQuestion>> {
        let questions = self.questions.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| questions.iter().find(|question| &question.id == id))
            .cloned()
            .collect())
    }

    async fn find_unattempted(&self, loop_id: &str) -> Result<Vec<PracticeQuestion>> {
        Ok(self
            .questions
            .read()
            .await
            .iter()
            .filter(|question| question.learning_loop_id == loop_id && question.is_open())
            .cloned()
            .collect())
    }

    async fn insert_questions(&self, questions: &[PracticeQuestion]) -> Result<()> {
        self.questions.write().await.extend_from_slice(questions);
        Ok(())
    }

    async fn save_question(&self, question: &PracticeQuestion) -> Result<()> {
        let mut questions = self.questions.write().await;
        let slot = questions
            .iter_mut()
            .find(|existing| existing.id == question.id)
            .ok_or_else(|| anyhow!("Practice question {} not found", question.id))?;
        *slot = question.clone();
        Ok(())
    }

    async fn tombstone_unattempted(&self, loop_id: &str) -> Result<u64> {
        let mut questions = self.questions.write().await;
        let mut retired = 0;
        for question in questions
            .iter_mut()
            .filter(|question| question.learning_loop_id == loop_id && question.is_open())
        {
            question.is_attempted = true;
            retired += 1;
        }
        Ok(retired)
    }
}
