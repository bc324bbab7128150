//! `/loop` routes. Every route runs behind JWT auth and the student guard;
//! ownership of the loop or attempt is checked by the engine.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{Accuracy, LoopSummary, PracticeQuestionView},
    services::{
        learning_loop_service::{AttemptReview, RoundOutcome, RoundReport},
        AppState,
    },
};

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswersRequest {
    #[validate(length(min = 1, message = "answers must not be empty"))]
    pub answers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub success: bool,
    pub message: String,
    pub learning_loop_id: Option<String>,
    pub ai_questions: Vec<PracticeQuestionView>,
    pub generated: usize,
    pub expected: usize,
    /// Source mistakes whose generation failed outright.
    pub failed: usize,
}

impl RoundResponse {
    fn empty(learning_loop_id: Option<String>, message: &str) -> Self {
        RoundResponse {
            success: true,
            message: message.to_string(),
            learning_loop_id,
            ai_questions: Vec::new(),
            generated: 0,
            expected: 0,
            failed: 0,
        }
    }

    fn from_report(report: &RoundReport) -> Self {
        let message = if report.shortfall() == 0 {
            format!("Generated {} AI questions", report.generated())
        } else {
            format!(
                "Generated {} of {} AI questions",
                report.generated(),
                report.expected
            )
        };
        RoundResponse {
            success: true,
            message,
            learning_loop_id: Some(report.learning_loop_id.clone()),
            ai_questions: report.questions.iter().map(PracticeQuestionView::from).collect(),
            generated: report.generated(),
            expected: report.expected,
            failed: report.failures.len(),
        }
    }
}

fn round_response(round: RoundOutcome) -> (StatusCode, Json<RoundResponse>) {
    match round {
        RoundOutcome::NoMistakes { learning_loop_id } => (
            StatusCode::OK,
            Json(RoundResponse::empty(
                Some(learning_loop_id),
                "No mistakes found. Great job!",
            )),
        ),
        RoundOutcome::Generated(report) => {
            if report.shortfall() > 0 {
                tracing::warn!(
                    learning_loop_id = %report.learning_loop_id,
                    generated = report.generated(),
                    expected = report.expected,
                    "Round generated fewer questions than expected"
                );
            }
            (StatusCode::CREATED, Json(RoundResponse::from_report(&report)))
        }
    }
}

/// POST /loop/from-attempt/{attempt_id}
pub async fn start_from_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let review = state.loops.start_from_attempt(&claims.sub, &attempt_id).await?;

    Ok(match review {
        AttemptReview::NoLoopNeeded => (
            StatusCode::OK,
            Json(RoundResponse::empty(
                None,
                "Perfect score! No learning loop needed.",
            )),
        ),
        AttemptReview::Started { reset, round } => {
            tracing::info!(attempt_id = %attempt_id, reset, "Learning loop armed from attempt");
            round_response(round)
        }
    })
}

/// POST /loop/{loop_id}/from-practice
pub async fn generate_from_practice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(loop_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let round = state.loops.generate_from_practice(&claims.sub, &loop_id).await?;
    Ok(round_response(round))
}

/// GET /loop/active
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let loops = state.loops.list_active_loops(&claims.sub).await?;
    let summaries: Vec<LoopSummary> = loops.iter().map(LoopSummary::from).collect();

    Ok(Json(json!({
        "success": true,
        "count": summaries.len(),
        "learningLoops": summaries
    })))
}

/// GET /loop/{loop_id}/questions
pub async fn current_questions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(loop_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let questions = state.loops.current_questions(&claims.sub, &loop_id).await?;
    let views: Vec<PracticeQuestionView> = questions.iter().map(PracticeQuestionView::from).collect();

    Ok(Json(json!({
        "success": true,
        "count": views.len(),
        "aiQuestions": views
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionResult {
    correct_answers: u32,
    wrong_count: u32,
    total_questions: u32,
    accuracy: Accuracy,
    is_mastered: bool,
    attempt_number: u32,
}

/// POST /loop/{loop_id}/submit
pub async fn submit_answers(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(loop_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let outcome = state
        .loops
        .grade_submission(&claims.sub, &loop_id, &req.answers)
        .await?;

    let message = if outcome.is_mastered {
        "Mastery achieved! Learning loop completed."
    } else {
        "AI questions submitted successfully"
    };

    let result = SubmissionResult {
        correct_answers: outcome.correct_answers,
        wrong_count: outcome.wrong_answers,
        total_questions: outcome.total_questions,
        accuracy: outcome.accuracy,
        is_mastered: outcome.is_mastered,
        attempt_number: outcome.attempt_number,
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "result": result
    })))
}

/// GET /loop/{loop_id}/results
pub async fn session_results(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(loop_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let learning_loop = state.loops.load_owned_loop(&claims.sub, &loop_id).await?;
    let result = state.results.last_session(&learning_loop).await?;

    Ok(Json(json!({
        "success": true,
        "result": result
    })))
}

/// POST /loop/{loop_id}/end
pub async fn end_loop(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(loop_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let learning_loop = state.loops.end_loop(&claims.sub, &loop_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Learning loop ended successfully",
        "learningLoop": LoopSummary::from(&learning_loop)
    })))
}
