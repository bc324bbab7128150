//! Remote practice-question generation.
//!
//! `QuestionGenerator` is the black-box text generator (OpenRouter chat
//! completions in production). Prompt building, response cleaning and
//! candidate validation live here too, so the figures in `LoopPolicy` drive
//! both what is asked for and what is accepted.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::{LoopPolicy, QuestionOption, SourceMistake};

const SYSTEM_INSTRUCTION: &str = "You are an expert educational content creator. \
Generate high-quality multiple-choice questions based on the provided context. \
You must return ONLY a valid JSON array. Do not include markdown formatting, \
code blocks, or any explanatory text. Return raw JSON only.";

const APP_TITLE: &str = "LearnLoop AI";

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap();
    static ref FENCE_CLOSE: Regex = Regex::new(r"\r?\n?```$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationErrorKind {
    Unauthorized,
    RateLimited,
    QuotaExhausted,
    Unreachable,
    Parse,
    Other,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::Unauthorized => "unauthorized",
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::QuotaExhausted => "quota_exhausted",
            GenerationErrorKind::Unreachable => "unreachable",
            GenerationErrorKind::Parse => "parse",
            GenerationErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Question generation failed ({kind}): {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Parse, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            GenerationErrorKind::Unreachable,
            format!("Generator did not answer within {}s", after.as_secs()),
        )
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::new(classify_status(status), err.to_string());
        }
        Self::new(
            GenerationErrorKind::Unreachable,
            format!("Could not reach generator: {}", err),
        )
    }

    /// Transient conditions worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            GenerationErrorKind::RateLimited | GenerationErrorKind::Unreachable
        )
    }
}

pub fn classify_status(status: StatusCode) -> GenerationErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationErrorKind::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => GenerationErrorKind::RateLimited,
        StatusCode::PAYMENT_REQUIRED => GenerationErrorKind::QuotaExhausted,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            GenerationErrorKind::Unreachable
        }
        _ => GenerationErrorKind::Other,
    }
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Sends one prompt and returns the raw completion text.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub referer: String,
}

pub struct OpenRouterGenerator {
    http_client: Client,
    settings: OpenRouterSettings,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenRouterGenerator {
    pub fn new(settings: OpenRouterSettings, request_timeout: Duration) -> anyhow::Result<Self> {
        let http_client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http_client,
            settings,
        })
    }
}

#[async_trait]
impl QuestionGenerator for OpenRouterGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if self.settings.api_key.trim().is_empty() {
            return Err(GenerationError::new(
                GenerationErrorKind::Unauthorized,
                "OpenRouter API key not configured",
            ));
        }

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_INSTRUCTION },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.7,
            "max_tokens": 2000,
        });

        tracing::debug!(model = %self.settings.model, "Calling OpenRouter");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(self.settings.api_key.trim())
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|value| {
                    value
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(GenerationError::new(
                classify_status(status),
                format!("OpenRouter returned {}: {}", status, message),
            ));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| GenerationError::parse(format!("Malformed completion body: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::parse("Completion carried no content"))
    }
}

/// Deterministic prompt for one source mistake.
pub fn build_prompt(mistake: &SourceMistake, policy: &LoopPolicy) -> String {
    let count = policy.candidates_per_mistake;
    let options = policy.options_per_candidate;

    let mut context = format!(
        "- Topic: {}\n- Concept: {}\n- Difficulty: {}\n",
        mistake.topic,
        mistake.concept,
        mistake.difficulty.as_str()
    );
    if let Some(domain) = &mistake.domain {
        context.push_str(&format!("- Domain: {}\n", domain));
    }

    let example_options = (0..options)
        .map(|i| {
            format!(
                "      {{\"text\": \"...\", \"isCorrect\": {}}}",
                if i == 0 { "true" } else { "false" }
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let mut prompt =
        format!("Generate {count} similar multiple-choice questions for educational assessment.\n\n");
    prompt.push_str(&format!("Context:\n{context}\n"));
    prompt.push_str(&format!("Reference Question: {}\n", mistake.question_text));
    prompt.push_str(&format!("Correct Answer: {}\n\n", mistake.correct_answer));
    prompt.push_str("Requirements:\n");
    prompt.push_str("1. Test the same concept with different scenarios\n");
    prompt.push_str("2. Maintain same difficulty level\n");
    prompt.push_str(&format!(
        "3. Exactly {options} options each, exactly one marked as correct\n"
    ));
    prompt.push_str("4. \"correctAnswer\" must repeat the text of the correct option\n");
    prompt.push_str("5. Include brief explanations\n");
    prompt.push_str("6. Return a valid JSON array only\n\n");
    prompt.push_str("Format:\n[\n  {\n    \"questionText\": \"...\",\n    \"options\": [\n");
    prompt.push_str(&example_options);
    prompt.push_str("\n    ],\n    \"correctAnswer\": \"...\",\n    \"explanation\": \"...\"\n  }\n]\n");
    prompt
}

/// Strips a surrounding code fence (with or without a language tag) and trims.
pub fn clean_response(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let start = FENCE_OPEN.find(trimmed).map(|m| m.end()).unwrap_or(0);
    let body = &trimmed[start..];
    let end = FENCE_CLOSE.find(body).map(|m| m.start()).unwrap_or(body.len());
    body[..end].trim()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    #[serde(default)]
    question_text: Option<String>,
    #[serde(default)]
    options: Option<Vec<RawOption>>,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Detailed {
        text: String,
        #[serde(rename = "isCorrect", default)]
        is_correct: bool,
    },
    Plain(String),
}

/// A generated question that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: String,
    pub explanation: Option<String>,
}

/// Parses a completion into candidates, dropping invalid entries and keeping at
/// most `candidates_per_mistake`. Only a body that is not a JSON array is an error.
pub fn parse_candidates(raw: &str, policy: &LoopPolicy) -> Result<Vec<Candidate>, GenerationError> {
    let cleaned = clean_response(raw);
    let values: Vec<serde_json::Value> = serde_json::from_str(cleaned)
        .map_err(|e| GenerationError::parse(format!("Response is not a JSON array: {}", e)))?;

    let total = values.len();
    let accepted: Vec<Candidate> = values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<RawCandidate>(value).ok())
        .filter_map(|raw| validate_candidate(raw, policy))
        .take(policy.candidates_per_mistake)
        .collect();

    if accepted.len() < total.min(policy.candidates_per_mistake) {
        tracing::debug!(
            received = total,
            accepted = accepted.len(),
            "Dropped invalid generated candidates"
        );
    }

    Ok(accepted)
}

fn validate_candidate(raw: RawCandidate, policy: &LoopPolicy) -> Option<Candidate> {
    let question_text = raw.question_text?.trim().to_string();
    let mut correct_answer = raw.correct_answer?.trim().to_string();
    if question_text.is_empty() || correct_answer.is_empty() {
        return None;
    }

    let mut options: Vec<QuestionOption> = raw
        .options?
        .into_iter()
        .map(|option| match option {
            RawOption::Detailed { text, is_correct } => QuestionOption {
                text: text.trim().to_string(),
                is_correct,
            },
            RawOption::Plain(text) => QuestionOption {
                text: text.trim().to_string(),
                is_correct: false,
            },
        })
        .collect();

    if options.len() != policy.options_per_candidate
        || options.iter().any(|option| option.text.is_empty())
    {
        return None;
    }

    let matching = options
        .iter()
        .filter(|option| option.text == correct_answer)
        .count();
    match matching {
        1 => {}
        0 => {
            // Some completions restate the answer loosely; trust a single flagged option.
            let mut flagged = options.iter().filter(|option| option.is_correct);
            match (flagged.next(), flagged.next()) {
                (Some(option), None) => correct_answer = option.text.clone(),
                _ => return None,
            }
        }
        _ => return None,
    }

    for option in &mut options {
        option.is_correct = option.text == correct_answer;
    }

    Some(Candidate {
        question_text,
        options,
        correct_answer,
        explanation: raw
            .explanation
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    })
}
