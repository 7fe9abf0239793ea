#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use quizmaster_bot::config::{Config, DiscordSettings, ObjectStorageSettings};
use quizmaster_bot::models::{Answer, Question, SessionKey};
use quizmaster_bot::services::message_gateway::{MessageContent, MessageGateway};
use quizmaster_bot::services::question_bank::{BankError, QuestionBankGateway};
use quizmaster_bot::services::quiz_engine::QuizEngine;
use quizmaster_bot::services::session_store::InMemorySessionStore;

/// Summary display time used by every test engine. Short enough that a
/// multi-question run finishes in well under two seconds.
pub const SUMMARY_MS: u64 = 100;

pub struct StaticQuestionBank {
    banks: HashMap<String, Vec<Question>>,
}

impl StaticQuestionBank {
    pub fn new(banks: HashMap<String, Vec<Question>>) -> Self {
        Self { banks }
    }
}

#[async_trait]
impl QuestionBankGateway for StaticQuestionBank {
    async fn get_questions(&self, bank: &str) -> Result<Vec<Question>, BankError> {
        match self.banks.get(bank) {
            Some(questions) if !questions.is_empty() => Ok(questions.clone()),
            _ => Err(BankError::NotFound(bank.to_string())),
        }
    }

    async fn question_image_url(&self, bank: &str, question_id: &str) -> Result<String, BankError> {
        Ok(format!("https://img.test/{}/{}/question.png", bank, question_id))
    }

    async fn explanation_image_url(
        &self,
        bank: &str,
        question_id: &str,
    ) -> Result<String, BankError> {
        Ok(format!(
            "https://img.test/{}/{}/explanation.png",
            bank, question_id
        ))
    }
}

/// Captures every message the engine posts, optionally failing some or all
/// of them to exercise the engine's failure paths.
#[derive(Default)]
pub struct RecordingMessageGateway {
    posts: Mutex<Vec<(String, MessageContent)>>,
    fail_all: AtomicBool,
    fail_summaries: AtomicBool,
}

impl RecordingMessageGateway {
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_summaries(&self, fail: bool) {
        self.fail_summaries.store(fail, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<(String, MessageContent)> {
        self.posts.lock().unwrap().clone()
    }

    /// Message kinds in posting order, e.g. ["question", "summary", ...].
    pub fn kinds(&self) -> Vec<&'static str> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, content)| content.kind())
            .collect()
    }
}

#[async_trait]
impl MessageGateway for RecordingMessageGateway {
    async fn post_message(
        &self,
        channel_id: &str,
        content: &MessageContent,
    ) -> anyhow::Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            bail!("simulated outage");
        }
        if self.fail_summaries.load(Ordering::SeqCst) && content.kind() == "summary" {
            bail!("simulated summary failure");
        }
        self.posts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.clone()));
        Ok(())
    }
}

pub struct TestHarness {
    pub engine: Arc<QuizEngine>,
    pub store: Arc<InMemorySessionStore>,
    pub gateway: Arc<RecordingMessageGateway>,
}

pub fn harness(banks: HashMap<String, Vec<Question>>) -> TestHarness {
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = Arc::new(RecordingMessageGateway::default());
    let engine = Arc::new(QuizEngine::new(
        store.clone(),
        Arc::new(StaticQuestionBank::new(banks)),
        gateway.clone(),
        Duration::from_millis(SUMMARY_MS),
    ));
    TestHarness {
        engine,
        store,
        gateway,
    }
}

/// A four-choice question in the "capitals" bank whose correct answer is
/// always `<id>-a`.
pub fn question(id: &str, show_time_ms: u64) -> Question {
    let answers = ["a", "b", "c", "d"]
        .iter()
        .enumerate()
        .map(|(index, suffix)| Answer {
            id: format!("{}-{}", id, suffix),
            text: format!("Option {}", (b'A' + index as u8) as char),
        })
        .collect();

    Question {
        bank: "capitals".into(),
        id: id.into(),
        text: format!("Question {}", id),
        answers,
        correct_answer_id: format!("{}-a", id),
        image_key: None,
        explanation: None,
        explanation_image_key: None,
        show_time_ms,
    }
}

pub fn key() -> SessionKey {
    SessionKey::new("g1", "c1")
}

pub fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".into(),
        mongo_database: "quizmaster-test".into(),
        redis_uri: "redis://127.0.0.1:6379/0".into(),
        discord: DiscordSettings {
            api_base: "https://discord.test/api/v10".into(),
            bot_token: "test-token".into(),
        },
        object_storage: ObjectStorageSettings {
            bucket: "quiz-media".into(),
            region: "us-east-1".into(),
            endpoint: Some("https://storage.test".into()),
            access_key: "key".into(),
            secret_key: "secret".into(),
            images_prefix: "quiz-images".into(),
        },
        summary_show_time_ms: SUMMARY_MS,
        session_ttl_seconds: 60,
    }
}
