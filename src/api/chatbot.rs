//! Chat entry point and operator controls over conversations

use crate::api::chatbot::schemas::{
    ChatMessage, ChatResponse, Cleared, PauseRequest, PauseState, Paused,
};
use crate::api::{ApiError, ExtractUser};
use crate::core::orchestrator::{HUMAN_INTERVENTION, MessageOutcome};
use crate::core::services::{MAX_PAUSE_HOURS, pause_for_hours};
use crate::core::traits::Orchestrator;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Duration;
use di_axum::Inject;
use log::info;

const DEFAULT_PAUSE_HOURS: f64 = 2.0;
const MANUAL_PAUSE: &str = "MANUAL";

pub fn router() -> Router {
    Router::new()
        .route("/message", post(process_message))
        .route("/history/:phone", delete(clear_history))
        .route("/conversations/:phone/pause", post(pause))
        .route("/conversations/:phone/unpause", post(unpause))
        .route("/conversations/:phone/pause-status", get(pause_status))
        .route(
            "/conversations/:phone/operator-message",
            post(operator_message),
        )
}

fn pause_duration(hours: Option<f64>) -> Result<Duration, ApiError> {
    pause_for_hours(hours.unwrap_or(DEFAULT_PAUSE_HOURS)).ok_or_else(|| {
        ApiError::bad_request(format!(
            "`hours` must be a positive number up to {MAX_PAUSE_HOURS}"
        ))
    })
}

async fn process_message(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(_operator): ExtractUser,
    Json(request): Json<ChatMessage>,
) -> Result<(StatusCode, Json<ChatResponse>), ApiError> {
    let phone = request.phone_number.trim();
    if phone.is_empty() || request.message.trim().is_empty() {
        return Err(ApiError::bad_request("phoneNumber e message são obrigatórios."));
    }

    let response = match orchestrator.process_message(phone, &request.message).await {
        MessageOutcome::Reply(reply) => ChatResponse::from(reply),
        MessageOutcome::Paused { .. } => ChatResponse::paused(),
    };

    Ok((StatusCode::OK, Json(response)))
}

async fn clear_history(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(operator): ExtractUser,
    Path(phone): Path<String>,
) -> Result<(StatusCode, Json<Cleared>), ApiError> {
    orchestrator.clear_history(&phone).await?;
    info!("history of {phone} cleared by {operator}");
    Ok((StatusCode::OK, Json(Cleared { cleared: true })))
}

async fn pause(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(operator): ExtractUser,
    Path(phone): Path<String>,
    request: Option<Json<PauseRequest>>,
) -> Result<(StatusCode, Json<Paused>), ApiError> {
    let hours = request.and_then(|Json(r)| r.hours);
    let duration = pause_duration(hours)?;

    orchestrator.pause(&phone, duration, MANUAL_PAUSE).await?;
    info!("{phone} paused by {operator} for {duration}");

    let status = orchestrator.pause_status(&phone).await?;
    Ok((StatusCode::OK, Json(Paused::new(status))))
}

async fn unpause(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(operator): ExtractUser,
    Path(phone): Path<String>,
) -> Result<(StatusCode, Json<PauseState>), ApiError> {
    orchestrator.unpause(&phone).await?;
    info!("{phone} resumed by {operator}");

    let status = orchestrator.pause_status(&phone).await?;
    Ok((StatusCode::OK, Json(status.into())))
}

async fn pause_status(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(_operator): ExtractUser,
    Path(phone): Path<String>,
) -> Result<(StatusCode, Json<PauseState>), ApiError> {
    let status = orchestrator.pause_status(&phone).await?;
    Ok((StatusCode::OK, Json(status.into())))
}

async fn operator_message(
    Inject(orchestrator): Inject<dyn Orchestrator>,
    ExtractUser(operator): ExtractUser,
    Path(phone): Path<String>,
) -> Result<(StatusCode, Json<Paused>), ApiError> {
    orchestrator.handle_operator_message(&phone).await?;
    info!("{operator} reported a manual message to {phone} ({HUMAN_INTERVENTION})");

    let status = orchestrator.pause_status(&phone).await?;
    Ok((StatusCode::OK, Json(Paused::new(status))))
}

pub mod schemas {
    use crate::core::interpreter::Intent;
    use crate::core::orchestrator::{ChatReply, PauseStatus};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct ChatMessage {
        pub phone_number: String,
        pub message: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct ChatResponse {
        /// Empty when the conversation is paused and nothing should be sent.
        pub message: String,
        pub intent: Option<Intent>,
        pub appointment_created: bool,
        pub appointment_id: Option<Uuid>,
        pub paused: bool,
    }

    impl ChatResponse {
        pub fn paused() -> ChatResponse {
            ChatResponse {
                message: String::new(),
                intent: None,
                appointment_created: false,
                appointment_id: None,
                paused: true,
            }
        }
    }

    impl From<ChatReply> for ChatResponse {
        fn from(reply: ChatReply) -> Self {
            ChatResponse {
                message: reply.message,
                intent: Some(reply.intent),
                appointment_created: reply.appointment_created,
                appointment_id: reply.appointment_id,
                paused: false,
            }
        }
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct PauseRequest {
        pub hours: Option<f64>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct PauseState {
        pub is_paused: bool,
        pub remaining_minutes: Option<i64>,
        pub remaining_hours: Option<f64>,
    }

    impl From<PauseStatus> for PauseState {
        fn from(status: PauseStatus) -> Self {
            PauseState {
                is_paused: status.is_paused,
                remaining_minutes: status.remaining_minutes,
                remaining_hours: status
                    .remaining_minutes
                    .map(|m| (m as f64 / 60.0 * 10.0).round() / 10.0),
            }
        }
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Paused {
        pub paused: bool,
        pub paused_until_minutes: Option<i64>,
    }

    impl Paused {
        pub fn new(status: PauseStatus) -> Paused {
            Paused {
                paused: status.is_paused,
                paused_until_minutes: status.remaining_minutes,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Cleared {
        pub cleared: bool,
    }
}
