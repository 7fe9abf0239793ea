use serde::Deserialize;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub discord: DiscordSettings,
    pub object_storage: ObjectStorageSettings,
    /// How long a per-question summary stays on screen before the next
    /// question is posted.
    pub summary_show_time_ms: u64,
    /// TTL for persisted session records. A safety net for loops that died
    /// without cleaning up; normal completion deletes the record explicitly.
    pub session_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub api_base: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub images_prefix: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "quizmaster".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let bot_token = settings
            .get_string("discord.bot_token")
            .or_else(|_| env::var("DISCORD_BOT_TOKEN"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: DISCORD_BOT_TOKEN must be set in production!");
                }
                eprintln!("WARNING: Using placeholder Discord bot token (dev mode only!)");
                "dev-token-only-for-local-testing".to_string()
            });

        let api_base = settings
            .get_string("discord.api_base")
            .or_else(|_| env::var("DISCORD_API_BASE"))
            .unwrap_or_else(|_| "https://discord.com/api/v10".to_string());

        let object_storage = ObjectStorageSettings {
            bucket: settings
                .get_string("object_storage.bucket")
                .or_else(|_| env::var("OBJECT_STORAGE_BUCKET"))
                .unwrap_or_else(|_| "quiz-images".to_string()),
            region: settings
                .get_string("object_storage.region")
                .or_else(|_| env::var("OBJECT_STORAGE_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: settings
                .get_string("object_storage.endpoint")
                .or_else(|_| env::var("OBJECT_STORAGE_ENDPOINT"))
                .ok(),
            access_key: settings
                .get_string("object_storage.access_key")
                .or_else(|_| env::var("OBJECT_STORAGE_ACCESS_KEY"))
                .unwrap_or_default(),
            secret_key: settings
                .get_string("object_storage.secret_key")
                .or_else(|_| env::var("OBJECT_STORAGE_SECRET_KEY"))
                .unwrap_or_default(),
            images_prefix: settings
                .get_string("object_storage.images_prefix")
                .or_else(|_| env::var("OBJECT_STORAGE_IMAGES_PREFIX"))
                .unwrap_or_else(|_| "quiz-images".to_string()),
        };

        let summary_show_time_ms = settings
            .get_int("quiz.summary_show_time_ms")
            .ok()
            .or_else(|| {
                env::var("SUMMARY_SHOW_TIME_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(5_000) as u64;

        let session_ttl_seconds = settings
            .get_int("quiz.session_ttl_seconds")
            .ok()
            .or_else(|| {
                env::var("SESSION_TTL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(7_200) as u64;

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            discord: DiscordSettings {
                api_base,
                bot_token,
            },
            object_storage,
            summary_show_time_ms,
            session_ttl_seconds,
        })
    }
}
