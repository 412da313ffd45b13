use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the hub handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("hub is shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("failed to encode stream chunk: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message text is empty")]
    EmptyMessage,

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token required")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token has no subject")]
    MissingSubject,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider is not configured: {0}")]
    NotConfigured(&'static str),

    #[error("AI provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("AI provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("jwt secret must not be empty")]
    EmptySecret,
}

/// HTTP-facing error with a structured JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::BadGateway(_) => "BAD_GATEWAY",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: String,
    code: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            warn!("request rejected: {}", self);
        }
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            code: self.error_code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured(_) => Self::Internal(err.to_string()),
            other => Self::BadGateway(other.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Hub(hub) => hub.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}
