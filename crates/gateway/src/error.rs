use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::protocol::anthropic;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with their client-facing HTTP mapping.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed client request: missing fields, empty turns, bad content.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream rejected our credentials even after rotation.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// Every pool entry is failed, cooling down or disabled.
    #[error("No usable upstream credentials available")]
    CredentialsExhausted,

    /// Network-level failure talking to the upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Upstream returned a non-success status we pass through as 502.
    #[error("Upstream error ({status}): {message}")]
    UpstreamStatus { status: u16, message: String },

    /// The binary event stream was unrecoverably corrupt (strict mode).
    #[error("Upstream stream corrupt: {0}")]
    Decode(String),

    /// Client event ordering violation in strict mode.
    #[error("Stream ordering violation: {0}")]
    Ordering(String),

    /// The request deadline elapsed.
    #[error("Request timed out")]
    Timeout,

    /// Internal error. `Some` messages came from outside and can be shown;
    /// `None` must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamAuth(_) | Self::CredentialsExhausted => StatusCode::UNAUTHORIZED,
            Self::ConnectionError(_) | Self::UpstreamStatus { .. } | Self::Decode(_) => StatusCode::BAD_GATEWAY,
            Self::Ordering(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::UpstreamAuth(_) | Self::CredentialsExhausted => "authentication_error",
            Self::ConnectionError(_) | Self::UpstreamStatus { .. } | Self::Decode(_) => "api_error",
            Self::Ordering(_) | Self::Internal(_) => "internal_error",
            Self::Timeout => "timeout_error",
        }
    }

    /// Message safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<credentials::CredentialError> for GatewayError {
    fn from(err: credentials::CredentialError) -> Self {
        match err {
            credentials::CredentialError::Exhausted => GatewayError::CredentialsExhausted,
        }
    }
}

/// Error body in the OpenAI shape, used by the chat-completions route.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_owned(),
                code: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// The same errors dressed in the Anthropic error body shape for the
/// messages route.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<GatewayError> for AnthropicErrorResponse {
    fn from(err: GatewayError) -> Self {
        let status = err.status_code();
        let body = anthropic::ErrorResponse {
            r#type: "error".to_owned(),
            error: anthropic::ErrorDetails {
                error_type: err.error_type().to_owned(),
                message: err.client_message(),
            },
        };

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
