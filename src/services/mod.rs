use std::sync::Arc;

use crate::config::Config;

pub mod image_store;
pub mod message_gateway;
pub mod question_bank;
pub mod quiz_engine;
pub mod session_store;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<quiz_engine::QuizEngine>,
}
