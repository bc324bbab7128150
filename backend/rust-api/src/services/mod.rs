use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use crate::config::{Config, StoreBackend};

pub mod errors;
pub mod learning_loop_service;
pub mod loop_events;
pub mod loop_locks;
pub mod practice_question_service;
pub mod question_generator;
pub mod session_result_service;
pub mod store;

use learning_loop_service::LearningLoopService;
use loop_events::{LoopEventSink, TracingEventSink};
use loop_locks::LoopLocks;
use practice_question_service::PracticeQuestionService;
use question_generator::{OpenRouterGenerator, OpenRouterSettings, QuestionGenerator};
use session_result_service::SessionResultService;
use store::{LoopStore, MemoryStore, MongoStore, QuestionBank};

pub struct AppState {
    pub config: Config,
    /// Present only with the MongoDB backend.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
    pub loops: LearningLoopService,
    pub results: SessionResultService,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::warn!("REDIS_URI not set, rate limiting disabled");
                None
            }
        };

        let generator: Arc<dyn QuestionGenerator> = Arc::new(OpenRouterGenerator::new(
            OpenRouterSettings {
                api_key: config.openrouter_api_key.clone(),
                model: config.openrouter_model.clone(),
                base_url: config.openrouter_base_url.clone(),
                referer: config.frontend_url.clone(),
            },
            Duration::from_secs(config.generation_timeout_seconds.max(1)),
        )?);
        if config.openrouter_api_key.trim().is_empty() {
            tracing::warn!("OPENROUTER_API_KEY not set, generation requests will fail");
        }
        let events: Arc<dyn LoopEventSink> = Arc::new(TracingEventSink);

        match config.store_backend {
            StoreBackend::Mongo => {
                let client = MongoClient::with_uri_str(&config.mongo_uri)
                    .await
                    .context("Failed to connect to MongoDB")?;
                let mongo = client.database(&config.mongo_database);
                tracing::info!("MongoDB connected");

                let store = Arc::new(MongoStore::new(mongo.clone()));
                let mut state =
                    Self::with_components(config, store.clone(), store, generator, events);
                state.mongo = Some(mongo);
                state.redis = redis;
                Ok(state)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                let mut state =
                    Self::with_components(config, store.clone(), store, generator, events);
                state.redis = redis;
                Ok(state)
            }
        }
    }

    /// Wires the services over explicit collaborators. No MongoDB or Redis handles.
    pub fn with_components(
        config: Config,
        store: Arc<dyn LoopStore>,
        bank: Arc<dyn QuestionBank>,
        generator: Arc<dyn QuestionGenerator>,
        events: Arc<dyn LoopEventSink>,
    ) -> Self {
        let practice = PracticeQuestionService::new(
            store.clone(),
            generator,
            config.loop_policy(),
            config.generation_settings(),
        );
        let loops = LearningLoopService::new(store.clone(), bank, practice, events, LoopLocks::new());
        let results = SessionResultService::new(store);

        Self {
            config,
            mongo: None,
            redis: None,
            loops,
            results,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri).context("Failed to create Redis client")?;

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
