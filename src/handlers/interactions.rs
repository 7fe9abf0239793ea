use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::Value;

use crate::models::interaction::{
    ephemeral_reply, pong, CommandOption, Interaction, InteractionPayload,
};
use crate::services::quiz_engine::{EngineError, QuizResponse};
use crate::services::AppState;

/// Component custom ids the bot owns. Buttons on a question message are
/// `answer_<answer id>`.
const ANSWER_PREFIX: &str = "answer_";

/// Entry point for Discord's interactions webhook. Every recognized
/// interaction gets an immediate ephemeral reply; unrecognized payloads get
/// a 400 so Discord stops retrying them.
pub async fn handle_interaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InteractionPayload>,
) -> impl IntoResponse {
    match payload.classify() {
        Interaction::Ping => Json(pong()).into_response(),
        Interaction::Command {
            name,
            guild_id,
            channel_id,
            options,
        } => dispatch_command(&state, &name, guild_id, channel_id, &options)
            .await
            .into_response(),
        Interaction::Component {
            custom_id,
            guild_id,
            channel_id,
            user_id,
        } => route_answer(&state, &custom_id, guild_id, channel_id, user_id)
            .await
            .into_response(),
        Interaction::ModalSubmit { custom_id } => {
            tracing::debug!("Ignoring modal submit: {:?}", custom_id);
            Json(ephemeral_reply("This interaction is not supported.")).into_response()
        }
        Interaction::Unknown(kind) => {
            tracing::warn!("Unhandled interaction type: {}", kind);
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn dispatch_command(
    state: &AppState,
    name: &str,
    guild_id: Option<String>,
    channel_id: Option<String>,
    options: &[CommandOption],
) -> impl IntoResponse {
    let (Some(guild_id), Some(channel_id)) = (guild_id, channel_id) else {
        return Json(ephemeral_reply(
            "Quiz commands only work inside a server channel.",
        ))
        .into_response();
    };

    let result = match name {
        "quiz-start" => {
            let quiz_name = option_str(options, "name").unwrap_or_default();
            state
                .engine
                .start_quiz(&guild_id, &channel_id, &quiz_name)
                .await
        }
        "quiz-stop" => state.engine.stop_quiz(&guild_id, &channel_id).await,
        "quiz-next" => state.engine.next_question(&guild_id, &channel_id).await,
        other => {
            tracing::warn!("Unknown command: {}", other);
            return Json(ephemeral_reply("Unknown command.")).into_response();
        }
    };

    engine_reply(result).into_response()
}

/// Maps an `answer_*` button click to an answer submission for the quiz
/// running in the click's channel.
async fn route_answer(
    state: &AppState,
    custom_id: &str,
    guild_id: Option<String>,
    channel_id: Option<String>,
    user_id: Option<String>,
) -> impl IntoResponse {
    let Some(answer_id) = custom_id.strip_prefix(ANSWER_PREFIX) else {
        return Json(ephemeral_reply("This button is not part of a quiz.")).into_response();
    };

    let (Some(guild_id), Some(channel_id)) = (guild_id, channel_id) else {
        return Json(ephemeral_reply("Answers only count inside a server channel."))
            .into_response();
    };
    let Some(user_id) = user_id else {
        return Json(ephemeral_reply("Could not tell who clicked this button.")).into_response();
    };

    let result = state
        .engine
        .handle_answer(&guild_id, &channel_id, &user_id, answer_id)
        .await;

    engine_reply(result).into_response()
}

fn engine_reply(result: Result<QuizResponse, EngineError>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(response) => (StatusCode::OK, Json(ephemeral_reply(&response.message))),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: EngineError) -> (StatusCode, Json<Value>) {
    tracing::error!("Quiz operation failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ephemeral_reply("Something went wrong while running the quiz.")),
    )
}

fn option_str(options: &[CommandOption], name: &str) -> Option<String> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
        .map(str::to_string)
}
