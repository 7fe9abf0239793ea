use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod interaction;

/// One multiple-choice question of a named bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub bank: String,
    pub id: String,
    pub text: String,
    pub answers: Vec<Answer>,
    pub correct_answer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation_image_key: Option<String>,
    pub show_time_ms: u64,
}

impl Question {
    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.id == self.correct_answer_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: String,
    pub text: String,
}

/// One running quiz is identified by the (guild, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub guild_id: String,
    pub channel_id: String,
}

impl SessionKey {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guild_id, self.channel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserScore {
    pub user_id: String,
    pub score: u32,
}

/// Persisted state of one running quiz.
///
/// The engine mutates this record and writes it back through the session
/// store before every suspension point, so a quiz survives the hosting
/// process being restarted between webhook deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub guild_id: String,
    pub channel_id: String,
    /// Unique per run. A run loop that reloads the session and sees a
    /// different run id knows it has been supplanted by a newer quiz.
    pub run_id: String,
    pub question_bank: Vec<Question>,
    pub current_question_id: Option<String>,
    /// Cumulative correct-answer counts, in first-answer order. The order
    /// is the stable tie-break for the final leaderboard.
    pub active_users: Vec<UserScore>,
    /// Users who answered the current question correctly. Reset every question.
    pub correct_users: HashSet<String>,
    /// Users who answered the current question at all. Reset every question.
    pub answered_users: HashSet<String>,
    pub started_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.guild_id, &self.channel_id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_question_id
            .as_deref()
            .and_then(|id| self.question_bank.iter().find(|q| q.id == id))
    }

    pub fn has_answered(&self, user_id: &str) -> bool {
        self.answered_users.contains(user_id)
    }

    /// Records one answer for the current question. Callers must have
    /// checked `has_answered` first; a respondent always ends up in
    /// `active_users`, even with zero correct answers.
    pub fn record_answer(&mut self, user_id: &str, correct: bool) {
        self.answered_users.insert(user_id.to_string());
        if correct {
            self.correct_users.insert(user_id.to_string());
        }
        match self.active_users.iter_mut().find(|u| u.user_id == user_id) {
            Some(entry) => {
                if correct {
                    entry.score += 1;
                }
            }
            None => self.active_users.push(UserScore {
                user_id: user_id.to_string(),
                score: u32::from(correct),
            }),
        }
    }

    pub fn clear_question_state(&mut self) {
        self.correct_users.clear();
        self.answered_users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_question() -> QuizSession {
        let question = Question {
            bank: "capitals".into(),
            id: "q1".into(),
            text: "Capital of France?".into(),
            answers: vec![
                Answer {
                    id: "a1".into(),
                    text: "Paris".into(),
                },
                Answer {
                    id: "a2".into(),
                    text: "Lyon".into(),
                },
            ],
            correct_answer_id: "a1".into(),
            image_key: None,
            explanation: None,
            explanation_image_key: None,
            show_time_ms: 1000,
        };
        QuizSession {
            guild_id: "g".into(),
            channel_id: "c".into(),
            run_id: "run".into(),
            question_bank: vec![question],
            current_question_id: Some("q1".into()),
            active_users: Vec::new(),
            correct_users: HashSet::new(),
            answered_users: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn correct_answer_scores_and_tracks_user() {
        let mut session = session_with_question();
        session.record_answer("u1", true);

        assert!(session.answered_users.contains("u1"));
        assert!(session.correct_users.contains("u1"));
        assert_eq!(
            session.active_users,
            vec![UserScore {
                user_id: "u1".into(),
                score: 1
            }]
        );
    }

    #[test]
    fn incorrect_answer_still_lists_the_user() {
        let mut session = session_with_question();
        session.record_answer("u1", false);

        assert!(session.answered_users.contains("u1"));
        assert!(!session.correct_users.contains("u1"));
        assert_eq!(
            session.active_users,
            vec![UserScore {
                user_id: "u1".into(),
                score: 0
            }]
        );
    }

    #[test]
    fn answered_users_always_cover_correct_users() {
        let mut session = session_with_question();
        session.record_answer("u1", true);
        session.record_answer("u2", false);

        assert!(session.correct_users.is_subset(&session.answered_users));
    }

    #[test]
    fn clearing_question_state_keeps_scores() {
        let mut session = session_with_question();
        session.record_answer("u1", true);
        session.clear_question_state();

        assert!(session.answered_users.is_empty());
        assert!(session.correct_users.is_empty());
        assert_eq!(session.active_users.len(), 1);
    }

    #[test]
    fn current_question_resolves_by_id() {
        let session = session_with_question();
        assert_eq!(session.current_question().map(|q| q.id.as_str()), Some("q1"));
    }
}
