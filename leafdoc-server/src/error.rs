use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Body text for 500s; the full error chain only goes to the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Handler error carrying the status it should be reported with.
///
/// Anything convertible into `anyhow::Error` becomes a 500, so `?` works
/// directly inside handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, anyhow::Error::msg(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, anyhow::Error::msg(message.into()))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, anyhow::Error::msg(message.into()))
    }

    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let detail = format!("{:#}", self.error);
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{detail}");
        } else {
            tracing::warn!(status = %self.status, "{detail}");
        }
        let message = match self.status {
            StatusCode::INTERNAL_SERVER_ERROR => INTERNAL_ERROR_MESSAGE.to_owned(),
            _ => detail,
        };
        (
            self.status,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::internal(err)
    }
}
