//! Request-time errors and their wire shapes.

use crate::error::BunstoneError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub mod http;

pub use http::HttpException;

/// One validation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    /// Build an entry, dropping the `body.`, `query.` or `params.` prefix from the field path.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let field = ["body.", "query.", "params."]
            .iter()
            .find_map(|prefix| field.strip_prefix(prefix))
            .map(str::to_string)
            .unwrap_or(field);
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Everything a route can fail with.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Http(#[from] HttpException),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// A guard rejected the request.
    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RequestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Http(HttpException::bad_request(json!({
            "statusCode": 400,
            "message": message.into(),
        })))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http(exception) => exception.status,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BunstoneError> for RequestError {
    fn from(err: BunstoneError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        match self {
            Self::Http(exception) => exception.into_response(),
            Self::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": 400, "errors": errors })),
            )
                .into_response(),
            // guard rejections take the generic error path, like any other failure
            other => {
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                tracing::error!(error = %other, "Request failed");
                (
                    status,
                    Json(json!({
                        "statusCode": status.as_u16(),
                        "message": other.to_string(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    })),
                )
                    .into_response()
            }
        }
    }
}
