use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::EngineError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("A valid x-user-id header is required")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let engine_err = match self {
            AppError::Unauthorized => {
                return message(
                    StatusCode::UNAUTHORIZED,
                    "A valid x-user-id header is required".to_string(),
                );
            }
            AppError::BadRequest(text) => return message(StatusCode::BAD_REQUEST, text),
            AppError::Engine(e) => e,
        };

        match engine_err {
            EngineError::Validation(errors) => {
                let body = Json(json!({ "message": "Validation error", "errors": errors }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            e @ (EngineError::MarketClosed
            | EngineError::InsufficientFunds { .. }
            | EngineError::InsufficientShares { .. }
            | EngineError::OrderNotPending(_)) => message(StatusCode::BAD_REQUEST, e.to_string()),
            EngineError::Forbidden => message(StatusCode::FORBIDDEN, "Forbidden".to_string()),
            e @ EngineError::NotFound(_) => message(StatusCode::NOT_FOUND, e.to_string()),
            EngineError::Storage(db_err) if db_err.is_retryable() => {
                tracing::warn!(error = ?db_err, "Retryable database error.");
                message(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "The request conflicted with another one, please retry".to_string(),
                )
            }
            EngineError::Storage(db_err) => {
                tracing::error!(error = ?db_err, "Database error.");
                message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            EngineError::Price(api_err) => {
                tracing::error!(error = ?api_err, "Price source error.");
                message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Price data is unavailable".to_string(),
                )
            }
        }
    }
}

fn message(status: StatusCode, text: String) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}
