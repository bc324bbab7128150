#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use learnloop_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService, STUDENT_ROLE},
    models::{
        Accuracy, AttemptAnswer, CanonicalQuestion, Difficulty, GradedAttempt, QuestionOption,
        TestRecord,
    },
    services::{
        loop_events::RecordingEventSink,
        question_generator::{GenerationError, QuestionGenerator},
        store::MemoryStore,
        AppState,
    },
};

pub const TEST_ID: &str = "test-algebra";

/// Generator double. Replies queued with `respond_when` are consumed by the
/// first prompt containing their needle; every other prompt gets two valid
/// candidates whose correct answer is `"A"`.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripted: Mutex<VecDeque<(String, Result<String, GenerationError>)>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn respond_when(&self, needle: &str, reply: Result<String, GenerationError>) {
        self.scripted
            .lock()
            .unwrap()
            .push_back((needle.to_string(), reply));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let scripted = {
            let mut queue = self.scripted.lock().unwrap();
            queue
                .iter()
                .position(|(needle, _)| prompt.contains(needle.as_str()))
                .and_then(|index| queue.remove(index))
        };

        match scripted {
            Some((_, reply)) => reply,
            None => Ok(valid_response(&format!("generated-{}", call))),
        }
    }
}

pub fn candidate(question_text: &str) -> Value {
    json!({
        "questionText": question_text,
        "options": [
            { "text": "A", "isCorrect": true },
            { "text": "B", "isCorrect": false },
            { "text": "C", "isCorrect": false },
            { "text": "D", "isCorrect": false }
        ],
        "correctAnswer": "A",
        "explanation": "A is the only option that holds."
    })
}

pub fn valid_response(tag: &str) -> String {
    json!([candidate(&format!("{} first", tag)), candidate(&format!("{} second", tag))]).to_string()
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub events: Arc<RecordingEventSink>,
    jwt: JwtService,
}

pub fn test_config() -> Config {
    let mut config = Config::local();
    config.jwt_secret = "integration-test-secret".to_string();
    config.generation_timeout_seconds = 5;
    config
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(ScriptedGenerator::default());
    let events = Arc::new(RecordingEventSink::new());
    let jwt = JwtService::new(&config.jwt_secret);

    let state = Arc::new(AppState::with_components(
        config,
        store.clone(),
        store.clone(),
        generator.clone(),
        events.clone(),
    ));

    seed_question_bank(&store).await;

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        generator,
        events,
        jwt,
    }
}

async fn seed_question_bank(store: &MemoryStore) {
    store
        .put_test(TestRecord {
            id: TEST_ID.to_string(),
            title: "Algebra basics".to_string(),
            domain: "Mathematics".to_string(),
            difficulty: Difficulty::Medium,
        })
        .await;

    for index in 1..=6 {
        store
            .put_canonical_question(CanonicalQuestion {
                id: format!("q{}", index),
                test_id: TEST_ID.to_string(),
                question_text: format!("Canonical question {}", index),
                options: vec![
                    QuestionOption {
                        text: "right".to_string(),
                        is_correct: true,
                    },
                    QuestionOption {
                        text: "wrong".to_string(),
                        is_correct: false,
                    },
                ],
                correct_answer: "right".to_string(),
                explanation: None,
                topic: Some("Linear equations".to_string()),
                concept: Some(format!("Concept {}", index)),
                difficulty: Difficulty::Medium,
            })
            .await;
    }
}

impl TestApp {
    pub fn token_for(&self, student_id: &str) -> String {
        self.token_with_role(student_id, STUDENT_ROLE)
    }

    pub fn token_with_role(&self, user_id: &str, role: &str) -> String {
        self.jwt
            .generate_token(&JwtClaims::new(user_id, role, 3600))
            .unwrap()
    }

    /// Stores a completed attempt; `wrong` and `right` are canonical question ids.
    pub async fn seed_attempt(
        &self,
        attempt_id: &str,
        student_id: &str,
        wrong: &[&str],
        right: &[&str],
    ) -> GradedAttempt {
        let answers: Vec<AttemptAnswer> = wrong
            .iter()
            .map(|id| (id, false))
            .chain(right.iter().map(|id| (id, true)))
            .map(|(id, is_correct)| AttemptAnswer {
                question_id: id.to_string(),
                selected_answer: Some(if is_correct { "right" } else { "wrong" }.to_string()),
                is_correct,
                marks_obtained: if is_correct { 1.0 } else { 0.0 },
            })
            .collect();
        let total = answers.len() as u32;
        let correct = right.len() as u32;

        let attempt = GradedAttempt {
            id: attempt_id.to_string(),
            student_id: student_id.to_string(),
            test_id: TEST_ID.to_string(),
            answers,
            score: f64::from(correct),
            total_questions: total,
            correct_answers: correct,
            wrong_answers: total - correct,
            accuracy: Accuracy::from_ratio(correct, total),
            completed_at: Some(chrono::Utc::now()),
            is_completed: true,
        };
        self.store.put_attempt(attempt.clone()).await;
        attempt
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Starts the loop over HTTP and returns `(loop_id, response body)`.
    pub async fn start_loop(&self, student_id: &str, attempt_id: &str) -> (String, Value) {
        let token = self.token_for(student_id);
        let (status, body) = self
            .request(
                "POST",
                &format!("/loop/from-attempt/{}", attempt_id),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "unexpected body: {}", body);
        let loop_id = body["learningLoopId"].as_str().unwrap().to_string();
        (loop_id, body)
    }

    /// Answers every open question of the loop, the first `correct` of them correctly.
    pub async fn answer_open_questions(&self, loop_id: &str, correct: usize) -> Value {
        let open: Vec<_> = self
            .store
            .questions_for_loop(loop_id)
            .await
            .into_iter()
            .filter(|question| !question.is_attempted)
            .collect();

        let answers: serde_json::Map<String, Value> = open
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let answer = if index < correct {
                    question.correct_answer.clone()
                } else {
                    "definitely wrong".to_string()
                };
                (question.id.clone(), Value::String(answer))
            })
            .collect();

        let student_id = open
            .first()
            .map(|question| question.student_id.clone())
            .expect("loop has open questions");
        let token = self.token_for(&student_id);
        let (status, body) = self
            .request(
                "POST",
                &format!("/loop/{}/submit", loop_id),
                Some(&token),
                Some(json!({ "answers": answers })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "unexpected body: {}", body);
        body
    }
}
