use std::env;
use std::time::Duration;

use crate::models::{Accuracy, LoopPolicy};
use crate::services::practice_question_service::GenerationSettings;
use crate::utils::retry::RetryConfig;

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Rate limiting is off when no Redis is configured.
    pub redis_uri: Option<String>,
    pub store_backend: StoreBackend,
    pub jwt_secret: String,
    pub server_addr: String,
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    pub frontend_url: String,
    pub generation_timeout_seconds: u64,
    pub generation_concurrency: usize,
    pub generation_max_attempts: usize,
    pub candidates_per_mistake: usize,
    pub options_per_candidate: usize,
    /// Percentage, e.g. 80.0.
    pub mastery_threshold: f64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + APP__* overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let lookup = |key: &str, var: &str| settings.get_string(key).or_else(|_| env::var(var)).ok();
        let defaults = Config::local();

        let mongo_uri = lookup("database.mongo_uri", "MONGO_URI").unwrap_or(defaults.mongo_uri);
        let mongo_database =
            lookup("database.mongo_database", "MONGO_DATABASE").unwrap_or(defaults.mongo_database);
        let redis_uri = lookup("redis.uri", "REDIS_URI").filter(|uri| !uri.trim().is_empty());

        let store_backend = match lookup("store.backend", "LEARNLOOP_STORE").as_deref() {
            Some("memory") => StoreBackend::Memory,
            Some("mongo") | None => StoreBackend::Mongo,
            Some(other) => {
                return Err(config::ConfigError::Message(format!(
                    "Unknown LEARNLOOP_STORE backend: {}",
                    other
                )))
            }
        };

        let jwt_secret = match lookup("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                DEV_JWT_SECRET.to_string()
            }
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            store_backend,
            jwt_secret,
            server_addr: lookup("server.addr", "SERVER_ADDR").unwrap_or(defaults.server_addr),
            openrouter_api_key: lookup("openrouter.api_key", "OPENROUTER_API_KEY")
                .unwrap_or_default(),
            openrouter_model: lookup("openrouter.model", "OPENROUTER_MODEL")
                .unwrap_or(defaults.openrouter_model),
            openrouter_base_url: lookup("openrouter.base_url", "OPENROUTER_BASE_URL")
                .unwrap_or(defaults.openrouter_base_url),
            frontend_url: lookup("frontend.url", "FRONTEND_URL").unwrap_or(defaults.frontend_url),
            generation_timeout_seconds: parse_or(
                lookup("generation.timeout_seconds", "GENERATION_TIMEOUT_SECONDS"),
                defaults.generation_timeout_seconds,
            )?,
            generation_concurrency: parse_or(
                lookup("generation.concurrency", "GENERATION_CONCURRENCY"),
                defaults.generation_concurrency,
            )?,
            generation_max_attempts: parse_or(
                lookup("generation.max_attempts", "GENERATION_MAX_ATTEMPTS"),
                defaults.generation_max_attempts,
            )?,
            candidates_per_mistake: parse_or(
                lookup("policy.candidates_per_mistake", "CANDIDATES_PER_MISTAKE"),
                defaults.candidates_per_mistake,
            )?,
            options_per_candidate: parse_or(
                lookup("policy.options_per_candidate", "OPTIONS_PER_CANDIDATE"),
                defaults.options_per_candidate,
            )?,
            mastery_threshold: parse_or(
                lookup("policy.mastery_threshold", "MASTERY_THRESHOLD"),
                defaults.mastery_threshold,
            )?,
        })
    }

    /// Development defaults: in-memory store, no Redis, no generator key.
    pub fn local() -> Self {
        let policy = LoopPolicy::default();
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "learnloop".to_string(),
            redis_uri: None,
            store_backend: StoreBackend::Memory,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            server_addr: "0.0.0.0:8081".to_string(),
            openrouter_api_key: String::new(),
            openrouter_model: "deepseek/deepseek-chat".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            generation_timeout_seconds: 60,
            generation_concurrency: 4,
            generation_max_attempts: 3,
            candidates_per_mistake: policy.candidates_per_mistake,
            options_per_candidate: policy.options_per_candidate,
            mastery_threshold: policy.mastery_threshold.as_percent(),
        }
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        LoopPolicy {
            candidates_per_mistake: self.candidates_per_mistake.max(1),
            options_per_candidate: self.options_per_candidate.max(2),
            mastery_threshold: Accuracy::from_percent(self.mastery_threshold),
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            timeout: Duration::from_secs(self.generation_timeout_seconds.max(1)),
            concurrency: self.generation_concurrency.max(1),
            retry: RetryConfig {
                max_attempts: self.generation_max_attempts.max(1),
                ..RetryConfig::default()
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    default: T,
) -> Result<T, config::ConfigError> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|_| {
            config::ConfigError::Message(format!("Invalid configuration value: {}", raw))
        }),
        None => Ok(default),
    }
}
