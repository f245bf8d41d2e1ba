use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use ai_integration::agent::{OllamaGenerator, ResponseGenerator, SimulatedGenerator};
use ai_integration::config::{AppConfig, GenerationBackend, StorageBackend};
use ai_integration::db::PgStateStorage;
use ai_integration::errors::AppError;
use ai_integration::routes::create_router;
use ai_integration::sentiment::KeywordSentimentAnalyzer;
use ai_integration::service::ChatService;
use ai_integration::storage::{JsonFileStorage, StateStorage};
use ai_integration::store::ConversationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ai_integration=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Storage ───────────────────────────────────────────────────────────────
    let storage: Arc<dyn StateStorage> = match &config.storage {
        StorageBackend::Json { data_dir } => {
            let storage = JsonFileStorage::in_dir(data_dir);
            info!("Persisting conversations to {}", storage.path().display());
            Arc::new(storage)
        }
        StorageBackend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .map_err(AppError::DatabaseConnectionFailed)?;
            PgStateStorage::migrate(&pool).await?;
            info!("Database connection established and migrations applied");
            Arc::new(PgStateStorage::new(pool))
        }
    };

    let store = ConversationStore::hydrate(storage).await?;

    // ── Generation ────────────────────────────────────────────────────────────
    let generator: Arc<dyn ResponseGenerator> = match &config.generation {
        GenerationBackend::Simulated { word_delay } => {
            info!("Using simulated replies ({} ms per word)", word_delay.as_millis());
            Arc::new(SimulatedGenerator::new(*word_delay))
        }
        GenerationBackend::Ollama { base_url, model } => {
            info!("Using Ollama model '{model}' at {base_url}");
            Arc::new(OllamaGenerator::new(base_url, model)?)
        }
    };

    let chat_service = ChatService::new(
        Arc::new(store),
        generator,
        Arc::new(KeywordSentimentAnalyzer::new()),
        config.chat_config(),
    );

    let app = create_router(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
