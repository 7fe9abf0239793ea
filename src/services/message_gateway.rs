use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::DiscordSettings;
use crate::metrics::MESSAGES_POSTED_TOTAL;

/// Content contract between the quiz engine and the chat surface. The
/// engine decides what to say; the gateway decides how it looks on Discord.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Question {
        prompt: String,
        choices: Vec<AnswerChoice>,
        image_url: Option<String>,
    },
    Summary {
        correct_count: usize,
        correct_answer: String,
        explanation: Option<String>,
        explanation_image_url: Option<String>,
    },
    Scores {
        board: String,
    },
}

impl MessageContent {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::Question { .. } => "question",
            MessageContent::Summary { .. } => "summary",
            MessageContent::Scores { .. } => "scores",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerChoice {
    /// Component custom id, `answer_<answer id>`.
    pub custom_id: String,
    /// Button letter: A, B, C, ...
    pub label: String,
    pub text: String,
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Posts one message to a channel. Callers decide whether a failure is
    /// fatal; mid-quiz the engine logs and moves on.
    async fn post_message(&self, channel_id: &str, content: &MessageContent)
        -> anyhow::Result<()>;
}

pub struct DiscordMessageGateway {
    http_client: Client,
    api_base: String,
    bot_token: String,
}

impl DiscordMessageGateway {
    pub fn new(settings: DiscordSettings) -> Self {
        Self {
            http_client: Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token,
        }
    }

    fn render(content: &MessageContent) -> Value {
        match content {
            MessageContent::Question {
                prompt,
                choices,
                image_url,
            } => {
                let mut description = prompt.clone();
                if !choices.is_empty() {
                    let listing = choices
                        .iter()
                        .map(|c| format!("{}) {}", c.label, c.text))
                        .collect::<Vec<_>>()
                        .join("\n");
                    description = format!("{}\n\n{}", description, listing);
                }

                let mut embed = json!({ "description": description });
                if let Some(url) = image_url {
                    embed["image"] = json!({ "url": url });
                }

                // Discord allows at most 5 buttons per action row.
                let components: Vec<Value> = choices
                    .chunks(5)
                    .map(|row| {
                        json!({
                            "type": 1,
                            "components": row
                                .iter()
                                .map(|c| json!({
                                    "type": 2,
                                    "style": 1,
                                    "label": c.label,
                                    "custom_id": c.custom_id,
                                }))
                                .collect::<Vec<Value>>(),
                        })
                    })
                    .collect();

                json!({ "embeds": [embed], "components": components })
            }
            MessageContent::Summary {
                correct_count,
                correct_answer,
                explanation,
                explanation_image_url,
            } => {
                let mut description = format!(
                    "{} user(s) answered correctly!\n\nCorrect answer: {}",
                    correct_count, correct_answer
                );
                if let Some(text) = explanation {
                    description = format!("{}\n\n{}", description, text);
                }

                let mut embed = json!({ "description": description });
                if let Some(url) = explanation_image_url {
                    embed["image"] = json!({ "url": url });
                }

                json!({ "embeds": [embed] })
            }
            MessageContent::Scores { board } => {
                json!({ "embeds": [{ "title": "Final scores", "description": board }] })
            }
        }
    }
}

#[async_trait]
impl MessageGateway for DiscordMessageGateway {
    async fn post_message(
        &self,
        channel_id: &str,
        content: &MessageContent,
    ) -> anyhow::Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let body = Self::render(content);
        let kind = content.kind();

        let result = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to call Discord message API");

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                MESSAGES_POSTED_TOTAL
                    .with_label_values(&[kind, "error"])
                    .inc();
                return Err(e);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            MESSAGES_POSTED_TOTAL
                .with_label_values(&[kind, "error"])
                .inc();
            anyhow::bail!("Discord API returned error {}: {}", status, error_text);
        }

        MESSAGES_POSTED_TOTAL
            .with_label_values(&[kind, "success"])
            .inc();
        Ok(())
    }
}
