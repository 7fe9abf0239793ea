use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, QUIZZES_ACTIVE, QUIZZES_STARTED_TOTAL};
use crate::models::{Question, QuizSession, SessionKey, UserScore};
use crate::services::message_gateway::{AnswerChoice, MessageContent, MessageGateway};
use crate::services::question_bank::{BankError, QuestionBankGateway};
use crate::services::session_store::{SessionStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("question bank unavailable: {0}")]
    Bank(#[source] anyhow::Error),
    #[error("failed to post the first question: {0}")]
    FirstQuestionPost(#[source] anyhow::Error),
}

/// User-facing outcome of a quiz operation. Expected error conditions are
/// rejections with a short specific message; only infrastructure failures
/// surface as `EngineError`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizResponse {
    pub accepted: bool,
    pub message: String,
}

impl QuizResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// Drives quizzes from start to finish: question sequencing, timed
/// advancement, per-question answer collection and score aggregation.
///
/// All session state lives in the session store; the engine keeps no quiz
/// state in memory beyond the per-key mutexes that serialize same-key
/// read-modify-write cycles. Each running quiz owns one spawned run loop
/// whose only suspension points are the two timed waits; the loop re-reads
/// the session at every checkpoint and terminates silently once the record
/// is gone or carries a different run id.
pub struct QuizEngine {
    store: Arc<dyn SessionStore>,
    bank: Arc<dyn QuestionBankGateway>,
    messages: Arc<dyn MessageGateway>,
    summary_show_time: Duration,
    // One mutex per (guild, channel); entries are a few bytes and bounded
    // by the number of distinct channels that ever ran a quiz.
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl QuizEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        bank: Arc<dyn QuestionBankGateway>,
        messages: Arc<dyn MessageGateway>,
        summary_show_time: Duration,
    ) -> Self {
        Self {
            store,
            bank,
            messages,
            summary_show_time,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Starts a new quiz for the channel, supplanting any quiz already
    /// running there. The first question is posted before this returns; the
    /// rest of the run is driven by a spawned loop.
    pub async fn start_quiz(
        self: &Arc<Self>,
        guild_id: &str,
        channel_id: &str,
        bank_name: &str,
    ) -> Result<QuizResponse, EngineError> {
        let bank_name = bank_name.trim();
        if bank_name.is_empty() {
            QUIZZES_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
            return Ok(QuizResponse::rejected("Please provide a quiz name."));
        }

        let questions = match self.bank.get_questions(bank_name).await {
            Ok(questions) => questions,
            Err(BankError::NotFound(name)) => {
                QUIZZES_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
                return Ok(QuizResponse::rejected(format!(
                    "No questions found for quiz '{}'.",
                    name
                )));
            }
            Err(BankError::Backend(e)) => return Err(EngineError::Bank(e)),
        };
        if questions.is_empty() {
            QUIZZES_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
            return Ok(QuizResponse::rejected(format!(
                "Quiz '{}' has no questions.",
                bank_name
            )));
        }

        let invalid: Vec<&str> = questions
            .iter()
            .filter(|q| q.text.trim().is_empty())
            .map(|q| q.id.as_str())
            .collect();
        if !invalid.is_empty() {
            QUIZZES_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
            return Ok(QuizResponse::rejected(format!(
                "These questions have no text: {}.",
                invalid.join(", ")
            )));
        }

        let key = SessionKey::new(guild_id, channel_id);
        self.begin_run(key, questions).await?;

        QUIZZES_STARTED_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!("Quiz '{}' started for {}:{}", bank_name, guild_id, channel_id);
        Ok(QuizResponse::accepted(format!("Quiz '{}' started!", bank_name)))
    }

    /// Stops the channel's quiz. The running loop observes the deletion at
    /// its next checkpoint and terminates without posting a summary or
    /// scores for the in-progress question.
    pub async fn stop_quiz(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<QuizResponse, EngineError> {
        let key = SessionKey::new(guild_id, channel_id);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        match self.store.get(&key).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => {
                return Ok(QuizResponse::rejected(
                    "There is no quiz running in this channel.",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        self.store.delete(&key).await?;
        tracing::info!("Quiz stopped for {}", key);
        Ok(QuizResponse::accepted("Quiz stopped."))
    }

    /// Manual advance: restarts a fresh run over the questions strictly
    /// after the current one, under the same key.
    pub async fn next_question(
        self: &Arc<Self>,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<QuizResponse, EngineError> {
        let key = SessionKey::new(guild_id, channel_id);
        let session = match self.store.get(&key).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                return Ok(QuizResponse::rejected(
                    "There is no quiz running in this channel.",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let current_index = session
            .current_question_id
            .as_deref()
            .and_then(|id| session.question_bank.iter().position(|q| q.id == id));

        let remaining = match current_index {
            Some(index) if index + 1 < session.question_bank.len() => {
                session.question_bank[index + 1..].to_vec()
            }
            _ => {
                return Ok(QuizResponse::rejected(
                    "There are no more questions in this quiz.",
                ));
            }
        };

        self.begin_run(key, remaining).await?;
        Ok(QuizResponse::accepted("Moving on to the next question."))
    }

    /// Records one user's answer to the current question, at most once per
    /// user per question. Runs under the per-key mutex so concurrent
    /// submissions cannot lose updates.
    pub async fn handle_answer(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        answer_id: &str,
    ) -> Result<QuizResponse, EngineError> {
        let key = SessionKey::new(guild_id, channel_id);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let mut session = match self.store.get(&key).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                return Ok(QuizResponse::rejected(
                    "There is no quiz running in this channel.",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(question) = session.current_question().cloned() else {
            return Ok(QuizResponse::rejected(
                "There is no active question right now.",
            ));
        };

        let Some(answer) = question.answers.iter().find(|a| a.id == answer_id) else {
            return Ok(QuizResponse::rejected(
                "This answer is not part of the current quiz.",
            ));
        };

        if session.has_answered(user_id) {
            return Ok(QuizResponse::rejected("You already answered this question."));
        }

        let correct = answer.id == question.correct_answer_id;
        session.record_answer(user_id, correct);
        self.store.set(&session).await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if correct { "true" } else { "false" }])
            .inc();
        tracing::info!(
            "Answer recorded for {}: user={}, question={}, correct={}",
            key,
            user_id,
            question.id,
            correct
        );

        Ok(QuizResponse::accepted(if correct {
            "Correct!"
        } else {
            "Incorrect!"
        }))
    }

    /// Posts the final leaderboard for a session. Nothing about quiz
    /// integrity depends on this message arriving, so failures are logged
    /// and swallowed.
    pub async fn show_scores(&self, session: &QuizSession) {
        let content = MessageContent::Scores {
            board: format_scoreboard(&session.active_users),
        };
        if let Err(e) = self.messages.post_message(&session.channel_id, &content).await {
            tracing::warn!(
                "Failed to post the score board for {}: {}",
                session.key(),
                e
            );
        }
    }

    /// Creates and persists a fresh session (deleting any previous one for
    /// the key), posts the first question, and spawns the run loop.
    ///
    /// Nothing has been shown yet when the first post fails, so that
    /// failure aborts the start and removes the session again.
    async fn begin_run(
        self: &Arc<Self>,
        key: SessionKey,
        questions: Vec<Question>,
    ) -> Result<(), EngineError> {
        let Some(first) = questions.first().cloned() else {
            return Ok(());
        };
        let run_id = Uuid::new_v4().to_string();

        {
            let lock = self.key_lock(&key);
            let _guard = lock.lock().await;

            self.store.delete(&key).await?;
            let session = QuizSession {
                guild_id: key.guild_id.clone(),
                channel_id: key.channel_id.clone(),
                run_id: run_id.clone(),
                question_bank: questions.clone(),
                current_question_id: Some(first.id.clone()),
                active_users: Vec::new(),
                correct_users: HashSet::new(),
                answered_users: HashSet::new(),
                started_at: Utc::now(),
            };
            self.store.set(&session).await?;
        }

        if let Err(e) = self.post_question(&key, &first).await {
            let _ = self.store.delete(&key).await;
            return Err(EngineError::FirstQuestionPost(e));
        }

        QUIZZES_ACTIVE.inc();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_loop(key, run_id, questions).await;
        });
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, key: SessionKey, run_id: String, questions: Vec<Question>) {
        self.drive_questions(&key, &run_id, &questions).await;
        QUIZZES_ACTIVE.dec();
    }

    async fn drive_questions(&self, key: &SessionKey, run_id: &str, questions: &[Question]) {
        let total = questions.len();

        for (index, question) in questions.iter().enumerate() {
            // The first question was already persisted and posted by
            // begin_run before the loop was spawned.
            if index > 0 {
                match self.advance_to(key, run_id, &question.id).await {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        tracing::error!(
                            "Halting quiz for {}: failed to persist question transition: {}",
                            key,
                            e
                        );
                        return;
                    }
                }
                if let Err(e) = self.post_question(key, question).await {
                    // Nobody saw this question, so nobody can answer it;
                    // move straight on to the next one.
                    tracing::warn!(
                        "Failed to post question {} for {}: {}",
                        question.id,
                        key,
                        e
                    );
                    continue;
                }
            }

            tokio::time::sleep(Duration::from_millis(question.show_time_ms)).await;

            let Some(session) = self.load_run(key, run_id).await else {
                return;
            };
            self.post_summary(key, question, session.correct_users.len())
                .await;

            {
                let lock = self.key_lock(key);
                let _guard = lock.lock().await;
                let Some(mut session) = self.load_run(key, run_id).await else {
                    return;
                };
                session.clear_question_state();
                if let Err(e) = self.store.set(&session).await {
                    tracing::error!(
                        "Halting quiz for {}: failed to persist cleared question state: {}",
                        key,
                        e
                    );
                    return;
                }
            }

            if index + 1 < total {
                tokio::time::sleep(self.summary_show_time).await;
            }
        }

        let Some(session) = self.load_run(key, run_id).await else {
            return;
        };
        self.show_scores(&session).await;

        {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;
            if let Err(e) = self.store.delete(key).await {
                tracing::error!("Failed to delete completed quiz session for {}: {}", key, e);
            }
        }
        tracing::info!("Quiz completed for {}", key);
    }

    /// Moves the persisted session to the given question. Returns false
    /// when the run has been stopped or supplanted.
    async fn advance_to(
        &self,
        key: &SessionKey,
        run_id: &str,
        question_id: &str,
    ) -> Result<bool, StoreError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut session = match self.store.get(key).await {
            Ok(session) if session.run_id == run_id => session,
            Ok(_) | Err(StoreError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };
        session.current_question_id = Some(question_id.to_string());
        self.store.set(&session).await?;
        Ok(true)
    }

    /// Reloads the session if this run still owns it. `None` means the quiz
    /// was stopped, supplanted, or the store is down (logged here).
    async fn load_run(&self, key: &SessionKey, run_id: &str) -> Option<QuizSession> {
        match self.store.get(key).await {
            Ok(session) if session.run_id == run_id => Some(session),
            Ok(_) | Err(StoreError::NotFound) => None,
            Err(e) => {
                tracing::error!("Halting quiz for {}: session store unavailable: {}", key, e);
                None
            }
        }
    }

    async fn post_question(&self, key: &SessionKey, question: &Question) -> anyhow::Result<()> {
        let image_url = if question.image_key.is_some() {
            match self
                .bank
                .question_image_url(&question.bank, &question.id)
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(
                        "Could not resolve image for question {}: {}",
                        question.id,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let choices = question
            .answers
            .iter()
            .enumerate()
            .map(|(index, answer)| AnswerChoice {
                custom_id: format!("answer_{}", answer.id),
                label: answer_label(index),
                text: answer.text.clone(),
            })
            .collect();

        let content = MessageContent::Question {
            prompt: question.text.clone(),
            choices,
            image_url,
        };
        self.messages.post_message(&key.channel_id, &content).await
    }

    async fn post_summary(&self, key: &SessionKey, question: &Question, correct_count: usize) {
        let correct_answer = question
            .correct_answer()
            .map(|a| a.text.clone())
            .unwrap_or_default();

        let explanation_image_url = if question.explanation_image_key.is_some() {
            match self
                .bank
                .explanation_image_url(&question.bank, &question.id)
                .await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(
                        "Could not resolve explanation image for question {}: {}",
                        question.id,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let content = MessageContent::Summary {
            correct_count,
            correct_answer,
            explanation: question.explanation.clone(),
            explanation_image_url,
        };

        // A missed summary must never stall the quiz.
        if let Err(e) = self.messages.post_message(&key.channel_id, &content).await {
            tracing::warn!(
                "Failed to post summary for question {} in {}: {}",
                question.id,
                key,
                e
            );
        }
    }
}

fn answer_label(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => ((b'A' + i) as char).to_string(),
        _ => (index + 1).to_string(),
    }
}

fn format_scoreboard(active_users: &[UserScore]) -> String {
    if active_users.is_empty() {
        return "No scores available.".to_string();
    }
    let mut ranked = active_users.to_vec();
    // Stable sort: ties keep first-answer order.
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
        .iter()
        .map(|u| format!("<@{}>: {} points", u.user_id, u.score))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(user: &str, points: u32) -> UserScore {
        UserScore {
            user_id: user.into(),
            score: points,
        }
    }

    #[test]
    fn empty_scoreboard_has_a_fixed_message() {
        assert_eq!(format_scoreboard(&[]), "No scores available.");
    }

    #[test]
    fn scoreboard_sorts_descending_with_stable_ties() {
        let board = format_scoreboard(&[score("u1", 1), score("u2", 3), score("u3", 1)]);
        assert_eq!(
            board,
            "<@u2>: 3 points\n<@u1>: 1 points\n<@u3>: 1 points"
        );
    }

    #[test]
    fn answer_labels_are_letters_then_numbers() {
        assert_eq!(answer_label(0), "A");
        assert_eq!(answer_label(3), "D");
        assert_eq!(answer_label(25), "Z");
        assert_eq!(answer_label(26), "27");
    }
}
