use axum::http::StatusCode;
use learnloop_api::services::{
    loop_events::LoopEvent,
    question_generator::{GenerationError, GenerationErrorKind},
    store::LoopStore,
};
use serde_json::json;

mod common;

#[tokio::test]
async fn test_three_mistakes_yield_six_questions_with_fenced_reply() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1", "q2", "q3"], &["q4"])
        .await;
    let fenced = format!("```json\n{}\n```", common::valid_response("fenced"));
    app.generator
        .respond_when("Canonical question 3", Ok(fenced));

    let (loop_id, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(app.generator.calls(), 3);
    assert_eq!(body["generated"], 6);
    assert_eq!(body["expected"], 6);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["message"], "Generated 6 AI questions");

    let learning_loop = app.store.find_loop(&loop_id).await.unwrap().unwrap();
    assert_eq!(learning_loop.total_ai_questions, 6);
    assert_eq!(learning_loop.ai_questions.len(), 6);

    let questions = app.store.find_questions(&learning_loop.ai_questions).await.unwrap();
    assert_eq!(
        questions
            .iter()
            .filter(|question| question.question_text.starts_with("fenced"))
            .count(),
        2
    );
    for question in &questions {
        assert_eq!(question.options.len(), 4);
        assert_eq!(question.options.iter().filter(|o| o.is_correct).count(), 1);
        assert_eq!(question.topic, "Linear equations");
        assert!(!question.is_attempted);
    }
}

#[tokio::test]
async fn test_candidate_without_correct_answer_is_dropped() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1"], &[]).await;
    let mut broken = common::candidate("missing answer");
    broken["correctAnswer"] = json!("");
    let reply = json!([common::candidate("well formed"), broken]).to_string();
    app.generator.respond_when("Canonical question 1", Ok(reply));

    let (loop_id, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(body["generated"], 1);
    assert_eq!(body["expected"], 2);
    assert_eq!(body["message"], "Generated 1 of 2 AI questions");
    let stored = app.store.questions_for_loop(&loop_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].question_text, "well formed");
}

#[tokio::test]
async fn test_failed_source_is_skipped_and_reported() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1", "q2"], &[])
        .await;
    app.generator.respond_when(
        "Canonical question 2",
        Err(GenerationError::new(
            GenerationErrorKind::QuotaExhausted,
            "credits exhausted",
        )),
    );

    let (_, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(body["generated"], 2);
    assert_eq!(body["expected"], 4);
    assert_eq!(body["failed"], 1);
    // Quota errors are not retried
    assert_eq!(app.generator.calls(), 2);

    let failures: Vec<_> = app
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            LoopEvent::GenerationFailed { source_id, kind, .. } => Some((source_id, kind)),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![("q2".to_string(), GenerationErrorKind::QuotaExhausted)]
    );
}

#[tokio::test]
async fn test_unparseable_reply_counts_as_zero_candidates() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1", "q2"], &[])
        .await;
    app.generator.respond_when(
        "Canonical question 1",
        Ok("Sure! Here are your questions: none".to_string()),
    );

    let (_, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(body["generated"], 2);
    assert_eq!(body["expected"], 4);
}

#[tokio::test]
async fn test_round_with_no_candidates_still_succeeds() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1"], &[]).await;
    app.generator.respond_when(
        "Canonical question 1",
        Err(GenerationError::new(
            GenerationErrorKind::Unauthorized,
            "invalid key",
        )),
    );

    let (loop_id, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(body["generated"], 0);
    assert_eq!(body["expected"], 2);
    assert_eq!(body["aiQuestions"].as_array().unwrap().len(), 0);
    let learning_loop = app.store.find_loop(&loop_id).await.unwrap().unwrap();
    assert_eq!(learning_loop.total_ai_questions, 0);
    assert!(app.events.names().contains(&"round_generated"));
}

#[tokio::test]
async fn test_rate_limited_generation_is_retried() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1"], &[]).await;
    app.generator.respond_when(
        "Canonical question 1",
        Err(GenerationError::new(
            GenerationErrorKind::RateLimited,
            "slow down",
        )),
    );

    let (_, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(app.generator.calls(), 2);
    assert_eq!(body["generated"], 2);
    assert_eq!(body["failed"], 0);
}

#[tokio::test]
async fn test_prompt_carries_mistake_context() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q2"], &[]).await;

    app.start_loop("student-1", "attempt-1").await;

    let prompts = app.generator.prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert!(prompt.contains("Linear equations"));
    assert!(prompt.contains("Concept 2"));
    assert!(prompt.contains("Mathematics"));
    assert!(prompt.contains("Canonical question 2"));
    assert!(prompt.contains("Exactly 4 options"));
}

#[tokio::test]
async fn test_missing_canonical_question_is_skipped() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1", "deleted-question"], &[])
        .await;

    let (_, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(app.generator.calls(), 1);
    assert_eq!(body["generated"], 2);
    assert_eq!(body["expected"], 2);
}

#[tokio::test]
async fn test_attempt_with_only_missing_questions_is_not_a_perfect_score() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["deleted-1", "deleted-2"], &["q1"])
        .await;

    let (loop_id, body) = app.start_loop("student-1", "attempt-1").await;

    assert_eq!(body["message"], "Generated 0 AI questions");
    assert_eq!(body["generated"], 0);
    assert_eq!(body["expected"], 0);
    assert_eq!(app.generator.calls(), 0);
    let learning_loop = app.store.find_loop(&loop_id).await.unwrap().unwrap();
    assert!(learning_loop.is_active);
    assert!(learning_loop.ai_questions.is_empty());
}

#[tokio::test]
async fn test_questions_endpoint_strips_answers() {
    let app = common::create_test_app().await;
    app.seed_attempt("attempt-1", "student-1", &["q1"], &[]).await;
    let (loop_id, _) = app.start_loop("student-1", "attempt-1").await;
    let token = app.token_for("student-1");

    let (status, body) = app
        .request(
            "GET",
            &format!("/loop/{}/questions", loop_id),
            Some(&token),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let raw = body.to_string();
    assert!(!raw.contains("correctAnswer"));
    assert!(!raw.contains("isCorrect"));
    assert!(!raw.contains("explanation"));
    let first = &body["aiQuestions"][0];
    assert!(first["questionText"].is_string());
    assert_eq!(first["options"].as_array().unwrap().len(), 4);
}
