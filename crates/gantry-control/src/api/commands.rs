//! Chat command endpoint used by the chat adapter.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::orchestrator::Reply;

use super::{error_response, ApiResult, AppState};

/// A chat line addressed to the bot.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Text as typed, mention markup included.
    pub text: String,
    /// Chat user who sent it.
    pub actor: String,
}

/// Reply to a chat line.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// Text to post back to the channel.
    pub message: String,
    /// Structured reply.
    pub reply: Reply,
}

/// Parse and handle a chat line.
pub async fn submit_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<CommandResponse> {
    info!(actor = %request.actor, text = %request.text, "received command");

    match state
        .orchestrator
        .handle_message(&request.text, &request.actor)
        .await
    {
        Ok(reply) => Ok(Json(CommandResponse {
            message: reply.to_string(),
            reply,
        })),
        Err(e) => {
            if e.is_fatal() {
                tracing::error!(actor = %request.actor, error = %e, "command could not be audited");
            }
            Err(error_response(&e))
        }
    }
}
