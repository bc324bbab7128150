use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};

use super::{
    LoopStore, QuestionBank, ATTEMPTS_COLLECTION, LOOPS_COLLECTION, PRACTICE_QUESTIONS_COLLECTION,
    QUESTIONS_COLLECTION, TESTS_COLLECTION,
};
use crate::metrics::track_db_operation;
use crate::models::{CanonicalQuestion, GradedAttempt, LearningLoop, PracticeQuestion, TestRecord};

#[derive(Clone)]
pub struct MongoStore {
    mongo: Database,
}

impl MongoStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn loops(&self) -> Collection<LearningLoop> {
        self.mongo.collection(LOOPS_COLLECTION)
    }

    fn practice_questions(&self) -> Collection<PracticeQuestion> {
        self.mongo.collection(PRACTICE_QUESTIONS_COLLECTION)
    }
}

#[async_trait]
impl QuestionBank for MongoStore {
    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<GradedAttempt>> {
        let collection: Collection<GradedAttempt> = self.mongo.collection(ATTEMPTS_COLLECTION);
        track_db_operation("find_one", ATTEMPTS_COLLECTION, async {
            collection
                .find_one(doc! { "_id": attempt_id })
                .await
                .context("Failed to query attempts collection")
        })
        .await
    }

    async fn get_test(&self, test_id: &str) -> Result<Option<TestRecord>> {
        let collection: Collection<TestRecord> = self.mongo.collection(TESTS_COLLECTION);
        track_db_operation("find_one", TESTS_COLLECTION, async {
            collection
                .find_one(doc! { "_id": test_id })
                .await
                .context("Failed to query tests collection")
        })
        .await
    }

    async fn get_canonical_question(&self, question_id: &str) -> Result<Option<CanonicalQuestion>> {
        let collection: Collection<CanonicalQuestion> =
            self.mongo.collection(QUESTIONS_COLLECTION);
        track_db_operation("find_one", QUESTIONS_COLLECTION, async {
            collection
                .find_one(doc! { "_id": question_id })
                .await
                .context("Failed to query questions collection")
        })
        .await
    }
}

#[async_trait]
impl LoopStore for MongoStore {
    async fn find_loop(&self, loop_id: &str) -> Result<Option<LearningLoop>> {
        track_db_operation("find_one", LOOPS_COLLECTION, async {
            self.loops()
                .find_one(doc! { "_id": loop_id })
                .await
                .context("Failed to query learning loop")
        })
        .await
    }

    async fn find_active_loop(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<Option<LearningLoop>> {
        track_db_operation("find_one", LOOPS_COLLECTION, async {
            self.loops()
                .find_one(doc! {
                    "studentId": student_id,
                    "testId": test_id,
                    "isActive": true,
                })
                .await
                .context("Failed to query active learning loop")
        })
        .await
    }

    async fn list_active_loops(&self, student_id: &str) -> Result<Vec<LearningLoop>> {
        track_db_operation("find", LOOPS_COLLECTION, async {
            let cursor = self
                .loops()
                .find(doc! {
                    "studentId": student_id,
                    "isActive": true,
                    "isMastered": false,
                })
                .sort(doc! { "startedAt": -1 })
                .await
                .context("Failed to query active learning loops")?;

            cursor
                .try_collect()
                .await
                .context("Learning loop cursor error")
        })
        .await
    }

    async fn insert_loop(&self, learning_loop: &LearningLoop) -> Result<()> {
        track_db_operation("insert_one", LOOPS_COLLECTION, async {
            self.loops()
                .insert_one(learning_loop)
                .await
                .context("Failed to insert learning loop")?;
            Ok(())
        })
        .await
    }

    async fn save_loop(&self, learning_loop: &LearningLoop) -> Result<()> {
        track_db_operation("replace_one", LOOPS_COLLECTION, async {
            self.loops()
                .replace_one(doc! { "_id": learning_loop.id.as_str() }, learning_loop)
                .await
                .context("Failed to save learning loop")?;
            Ok(())
        })
        .await
    }

    async fn find_question(&self, question_id: &str) -> Result<Option<PracticeQuestion>> {
        track_db_operation("find_one", PRACTICE_QUESTIONS_COLLECTION, async {
            self.practice_questions()
                .find_one(doc! { "_id": question_id })
                .await
                .context("Failed to query practice question")
        })
        .await
    }

    async fn find_questions(&self, ids: &[String]) -> Result<Vec<PracticeQuestion>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut found: Vec<PracticeQuestion> =
            track_db_operation("find", PRACTICE_QUESTIONS_COLLECTION, async {
                let cursor = self
                    .practice_questions()
                    .find(doc! { "_id": { "$in": ids } })
                    .await
                    .context("Failed to query practice questions")?;

                cursor
                    .try_collect()
                    .await
                    .context("Practice question cursor error")
            })
            .await?;

        // $in does not preserve the requested order
        found.sort_by_key(|question| {
            ids.iter()
                .position(|id| id == &question.id)
                .unwrap_or(usize::MAX)
        });
        Ok(found)
    }

    async fn find_unattempted(&self, loop_id: &str) -> Result<Vec<PracticeQuestion>> {
        track_db_operation("find", PRACTICE_QUESTIONS_COLLECTION, async {
            let cursor = self
                .practice_questions()
                .find(doc! { "learningLoopId": loop_id, "isAttempted": false })
                .sort(doc! { "generatedAt": 1 })
                .await
                .context("Failed to query open practice questions")?;

            cursor
                .try_collect()
                .await
                .context("Practice question cursor error")
        })
        .await
    }

    async fn insert_questions(&self, questions: &[PracticeQuestion]) -> Result<()> {
        if questions.is_empty() {
            return Ok(());
        }

        track_db_operation("insert_many", PRACTICE_QUESTIONS_COLLECTION, async {
            self.practice_questions()
                .insert_many(questions)
                .await
                .context("Failed to insert practice questions")?;
            Ok(())
        })
        .await
    }

    async fn save_question(&self, question: &PracticeQuestion) -> Result<()> {
        track_db_operation("replace_one", PRACTICE_QUESTIONS_COLLECTION, async {
            self.practice_questions()
                .replace_one(doc! { "_id": question.id.as_str() }, question)
                .await
                .context("Failed to save practice question")?;
            Ok(())
        })
        .await
    }

    async fn tombstone_unattempted(&self, loop_id: &str) -> Result<u64> {
        track_db_operation("update_many", PRACTICE_QUESTIONS_COLLECTION, async {
            let result = self
                .practice_questions()
                .update_many(
                    doc! { "learningLoopId": loop_id, "isAttempted": false },
                    doc! { "$set": { "isAttempted": true } },
                )
                .await
                .context("Failed to retire open practice questions")?;
            Ok(result.modified_count)
        })
        .await
    }
}
