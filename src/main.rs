use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizmaster_bot::services::image_store::ImageStoreClient;
use quizmaster_bot::services::message_gateway::DiscordMessageGateway;
use quizmaster_bot::services::question_bank::MongoQuestionBank;
use quizmaster_bot::services::quiz_engine::QuizEngine;
use quizmaster_bot::services::session_store::RedisSessionStore;
use quizmaster_bot::{create_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizmaster_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Connecting to MongoDB...");
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
    let mongo = mongo_client.database(&config.mongo_database);
    tracing::info!("MongoDB connection established");

    let redis_client = redis::Client::open(config.redis_uri.clone())?;
    let store = RedisSessionStore::connect(redis_client, config.session_ttl_seconds).await?;

    let images = ImageStoreClient::new(config.object_storage.clone())?;
    let bank = MongoQuestionBank::new(mongo, images);
    let messages = DiscordMessageGateway::new(config.discord.clone());

    let engine = Arc::new(QuizEngine::new(
        Arc::new(store),
        Arc::new(bank),
        Arc::new(messages),
        Duration::from_millis(config.summary_show_time_ms),
    ));

    let app_state = Arc::new(AppState { config, engine });
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
    tracing::info!("Quiz bot listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
