use crate::core::errors::SchedulingError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use log::error;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

pub mod appointments;
pub mod chatbot;
pub mod telegram;

const X_USER_ID: &str = "X-User-ID";

/// Operator identity, recorded as the editor of every change made through the API.
#[derive(Debug)]
pub struct ExtractUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(user_id) = parts.headers.get(X_USER_ID) {
            let user_id = user_id
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            let user_id = Uuid::from_str(user_id)
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            Ok(ExtractUser(user_id))
        } else {
            Err((StatusCode::BAD_REQUEST, "`X-User-ID` header is missing"))
        }
    }
}

/// Error body `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn internal(error: impl std::fmt::Display) -> ApiError {
        error!("{error}");
        ApiError(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_owned(),
        )
    }
}

impl From<SchedulingError> for ApiError {
    fn from(error: SchedulingError) -> Self {
        let status = match &error {
            SchedulingError::Validation(_) => StatusCode::BAD_REQUEST,
            SchedulingError::NotFound => StatusCode::NOT_FOUND,
            SchedulingError::Unavailable | SchedulingError::AlreadyCancelled => {
                StatusCode::CONFLICT
            }
            SchedulingError::Storage(_) => return ApiError::internal(error),
        };
        ApiError(status, error.user_message())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::internal(format!("{error:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

/// All HTTP routes; the DI provider is attached by the caller.
pub fn router() -> Router {
    Router::new()
        .nest("/appointments", appointments::router())
        .nest("/chatbot", chatbot::router())
}
