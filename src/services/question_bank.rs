use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, Database};
use thiserror::Error;

use crate::models::Question;
use crate::services::image_store::ImageStoreClient;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("question bank '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Read-only access to named question banks and their image attachments.
#[async_trait]
pub trait QuestionBankGateway: Send + Sync {
    /// Returns the bank's questions in display order.
    async fn get_questions(&self, bank: &str) -> Result<Vec<Question>, BankError>;
    async fn question_image_url(&self, bank: &str, question_id: &str) -> Result<String, BankError>;
    async fn explanation_image_url(
        &self,
        bank: &str,
        question_id: &str,
    ) -> Result<String, BankError>;
}

pub struct MongoQuestionBank {
    mongo: Database,
    images: ImageStoreClient,
    image_url_ttl: Duration,
}

impl MongoQuestionBank {
    pub fn new(mongo: Database, images: ImageStoreClient) -> Self {
        Self {
            mongo,
            images,
            // Outlives any realistic quiz run.
            image_url_ttl: Duration::from_secs(3600),
        }
    }

    async fn find_question(&self, bank: &str, question_id: &str) -> Result<Question, BankError> {
        let collection: mongodb::Collection<Question> = self.mongo.collection("questions");
        collection
            .find_one(doc! { "bank": bank, "id": question_id })
            .await
            .context("Failed to query questions collection")?
            .ok_or_else(|| BankError::NotFound(format!("{}/{}", bank, question_id)))
    }
}

#[async_trait]
impl QuestionBankGateway for MongoQuestionBank {
    async fn get_questions(&self, bank: &str) -> Result<Vec<Question>, BankError> {
        let collection: mongodb::Collection<Question> = self.mongo.collection("questions");

        let cursor = collection
            .find(doc! { "bank": bank })
            .sort(doc! { "position": 1 })
            .await
            .context("Failed to query questions collection")?;

        let questions: Vec<Question> = cursor
            .try_collect()
            .await
            .context("Failed to read questions cursor")?;

        if questions.is_empty() {
            return Err(BankError::NotFound(bank.to_string()));
        }

        tracing::debug!("Loaded {} questions for bank '{}'", questions.len(), bank);
        Ok(questions)
    }

    async fn question_image_url(&self, bank: &str, question_id: &str) -> Result<String, BankError> {
        let question = self.find_question(bank, question_id).await?;
        let key = question
            .image_key
            .ok_or_else(|| anyhow!("question {}/{} has no image", bank, question_id))?;
        Ok(self.images.presigned_image_url(&key, self.image_url_ttl)?)
    }

    async fn explanation_image_url(
        &self,
        bank: &str,
        question_id: &str,
    ) -> Result<String, BankError> {
        let question = self.find_question(bank, question_id).await?;
        let key = question
            .explanation_image_key
            .ok_or_else(|| anyhow!("question {}/{} has no explanation image", bank, question_id))?;
        Ok(self.images.presigned_image_url(&key, self.image_url_ttl)?)
    }
}
