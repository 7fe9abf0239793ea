use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::metrics::track_cache_operation;
use crate::models::{QuizSession, SessionKey};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no quiz session for this channel")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Dumb persistence for quiz sessions, one record per (guild, channel) key.
///
/// `set` is a whole-record upsert. The engine serializes all same-key
/// read-modify-write cycles behind a per-key mutex, so an upsert cannot
/// lose a concurrent writer's fields. Different keys may be accessed
/// concurrently without restriction.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &SessionKey) -> Result<QuizSession, StoreError>;
    async fn set(&self, session: &QuizSession) -> Result<(), StoreError>;
    /// Removes the record. Deleting an absent key is not an error.
    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError>;
}

pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub async fn connect(client: redis::Client, ttl_seconds: u64) -> anyhow::Result<Self> {
        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self {
            redis,
            ttl_seconds,
        })
    }

    fn record_key(key: &SessionKey) -> String {
        format!("quiz:session:{}:{}", key.guild_id, key.channel_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &SessionKey) -> Result<QuizSession, StoreError> {
        let mut conn = self.redis.clone();
        let record_key = Self::record_key(key);

        let session_json: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .context("Failed to read session from Redis")
        })
        .await?;

        let session_json = session_json.ok_or(StoreError::NotFound)?;
        let session =
            serde_json::from_str(&session_json).context("Failed to deserialize session")?;
        Ok(session)
    }

    async fn set(&self, session: &QuizSession) -> Result<(), StoreError> {
        let record_key = Self::record_key(&session.key());
        let session_json =
            serde_json::to_string(session).context("Failed to serialize session")?;

        // SETEX is idempotent, so retrying a flaky write is safe.
        retry_async_with_config(RetryConfig::aggressive(), || async {
            let mut conn = self.redis.clone();
            track_cache_operation("setex", async {
                redis::cmd("SETEX")
                    .arg(&record_key)
                    .arg(self.ttl_seconds)
                    .arg(&session_json)
                    .query_async::<()>(&mut conn)
                    .await
                    .context("Failed to save session to Redis")
            })
            .await
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        let record_key = Self::record_key(key);

        retry_async_with_config(RetryConfig::default(), || async {
            let mut conn = self.redis.clone();
            track_cache_operation("del", async {
                redis::cmd("DEL")
                    .arg(&record_key)
                    .query_async::<()>(&mut conn)
                    .await
                    .context("Failed to delete session from Redis")
            })
            .await
        })
        .await?;

        Ok(())
    }
}

/// Map-backed store used in tests and local development.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, QuizSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Result<QuizSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set(&self, session: &QuizSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.key(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.sessions.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn session(guild: &str, channel: &str) -> QuizSession {
        QuizSession {
            guild_id: guild.into(),
            channel_id: channel.into(),
            run_id: "run-1".into(),
            question_bank: Vec::new(),
            current_question_id: None,
            active_users: Vec::new(),
            correct_users: HashSet::new(),
            answered_users: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_returns_not_found_for_missing_key() {
        let store = InMemorySessionStore::new();
        let err = store.get(&SessionKey::new("g", "c")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = InMemorySessionStore::new();
        store.set(&session("g", "c")).await.unwrap();

        let loaded = store.get(&SessionKey::new("g", "c")).await.unwrap();
        assert_eq!(loaded.run_id, "run-1");
    }

    #[tokio::test]
    async fn set_upserts_by_key() {
        let store = InMemorySessionStore::new();
        store.set(&session("g", "c")).await.unwrap();

        let mut updated = session("g", "c");
        updated.run_id = "run-2".into();
        store.set(&updated).await.unwrap();

        let loaded = store.get(&SessionKey::new("g", "c")).await.unwrap();
        assert_eq!(loaded.run_id, "run-2");
    }

    #[tokio::test]
    async fn delete_is_a_noop_when_absent() {
        let store = InMemorySessionStore::new();
        store.delete(&SessionKey::new("g", "c")).await.unwrap();

        store.set(&session("g", "c")).await.unwrap();
        store.delete(&SessionKey::new("g", "c")).await.unwrap();
        assert!(store.get(&SessionKey::new("g", "c")).await.is_err());
    }

    #[tokio::test]
    async fn keys_do_not_collide() {
        let store = InMemorySessionStore::new();
        store.set(&session("g1", "c1")).await.unwrap();
        store.set(&session("g1", "c2")).await.unwrap();

        store.delete(&SessionKey::new("g1", "c1")).await.unwrap();
        assert!(store.get(&SessionKey::new("g1", "c2")).await.is_ok());
    }
}
