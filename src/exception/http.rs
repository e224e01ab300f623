use axum::{
    Json,
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// An HTTP error (or success shortcut) with a status code and a response body.
///
/// String bodies are sent as plain text, anything else as JSON.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {response}")]
pub struct HttpException {
    pub status: StatusCode,
    pub response: Value,
}

impl HttpException {
    pub fn new(status: StatusCode, response: impl Into<Value>) -> Self {
        Self {
            status,
            response: response.into(),
        }
    }

    fn with_default(status: StatusCode, response: Option<Value>, default: &str) -> Self {
        let response = response.unwrap_or_else(|| {
            json!({
                "statusCode": status.as_u16(),
                "message": default,
            })
        });
        Self { status, response }
    }

    pub fn bad_request(response: impl Into<Value>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, response)
    }

    pub fn unauthorized(response: Option<Value>) -> Self {
        Self::with_default(StatusCode::UNAUTHORIZED, response, "Unauthorized")
    }

    pub fn forbidden(response: Option<Value>) -> Self {
        Self::with_default(StatusCode::FORBIDDEN, response, "Forbidden")
    }

    pub fn not_found(response: Option<Value>) -> Self {
        Self::with_default(StatusCode::NOT_FOUND, response, "Not Found")
    }

    pub fn conflict(response: Option<Value>) -> Self {
        Self::with_default(StatusCode::CONFLICT, response, "Conflict")
    }

    pub fn unprocessable_entity(response: Option<Value>) -> Self {
        Self::with_default(
            StatusCode::UNPROCESSABLE_ENTITY,
            response,
            "Unprocessable Entity",
        )
    }

    pub fn internal_server_error(response: Option<Value>) -> Self {
        Self::with_default(
            StatusCode::INTERNAL_SERVER_ERROR,
            response,
            "Internal Server Error",
        )
    }

    pub fn ok(response: impl Into<Value>) -> Self {
        Self::new(StatusCode::OK, response)
    }

    pub fn created(response: impl Into<Value>) -> Self {
        Self::new(StatusCode::CREATED, response)
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, Value::Null)
    }
}

impl IntoResponse for HttpException {
    fn into_response(self) -> Response {
        match self.response {
            _ if self.status == StatusCode::NO_CONTENT => {
                (self.status, Body::empty()).into_response()
            }
            Value::String(text) => (
                self.status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text,
            )
                .into_response(),
            body => (self.status, Json(body)).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bodies() {
        let err = HttpException::not_found(None);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.response["message"], "Not Found");
        assert_eq!(err.response["statusCode"], 404);

        let err = HttpException::conflict(Some(json!({"reason": "taken"})));
        assert_eq!(err.response, json!({"reason": "taken"}));
    }

    #[test]
    fn test_string_body_is_plain_text() {
        let response = HttpException::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_success_shortcuts() {
        assert_eq!(HttpException::created(json!({"id": 1})).status, StatusCode::CREATED);
        let response = HttpException::no_content().into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
