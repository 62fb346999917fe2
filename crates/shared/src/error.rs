use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotReady,
    UnregisteredRecipient,
    ReconnectInProgress,
    SessionTransport,
    MaxAttemptsExceeded,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// Short caller-facing label used as the `error` field of responses.
    pub fn summary(self) -> &'static str {
        match self {
            ErrorCode::Validation => "invalid request",
            ErrorCode::NotReady => "session not ready",
            ErrorCode::UnregisteredRecipient => "invalid number",
            ErrorCode::ReconnectInProgress => "reconnect already in progress",
            ErrorCode::SessionTransport => "session transport failure",
            ErrorCode::MaxAttemptsExceeded => "maximum reconnect attempts exceeded",
            ErrorCode::NotFound => "endpoint not found",
            ErrorCode::Internal => "internal server error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub error: String,
    pub message: String,
    #[serde(
        default,
        rename = "reconnectAttempts",
        skip_serializing_if = "Option::is_none"
    )]
    pub reconnect_attempts: Option<u32>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            error: code.summary().to_string(),
            message: message.into(),
            reconnect_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    #[error("session is not ready (current state: {state})")]
    NotReady { state: SessionState },
    #[error("number {0} is not registered")]
    UnregisteredRecipient(String),
    #[error("a reconnect is already in progress (attempt {attempts})")]
    ReconnectInProgress { attempts: u32 },
    #[error("session transport failure: {0}")]
    SessionTransport(String),
    #[error("maximum reconnect attempts ({max}) exceeded; manual reconnect required")]
    MaxAttemptsExceeded { max: u32 },
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Validation(_) => ErrorCode::Validation,
            GatewayError::NotReady { .. } => ErrorCode::NotReady,
            GatewayError::UnregisteredRecipient(_) => ErrorCode::UnregisteredRecipient,
            GatewayError::ReconnectInProgress { .. } => ErrorCode::ReconnectInProgress,
            GatewayError::SessionTransport(_) => ErrorCode::SessionTransport,
            GatewayError::MaxAttemptsExceeded { .. } => ErrorCode::MaxAttemptsExceeded,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Wraps a collaborator failure, keeping its full context chain.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        GatewayError::SessionTransport(format!("{err:#}"))
    }
}

impl From<GatewayError> for ApiError {
    fn from(value: GatewayError) -> Self {
        let code = value.code();
        match value {
            // Transport and internal details stay in the logs.
            GatewayError::SessionTransport(_) | GatewayError::Internal(_) => {
                ApiError::new(code, "the session failed to complete the request")
            }
            GatewayError::ReconnectInProgress { attempts } => {
                let mut api = ApiError::new(code, value.to_string());
                api.reconnect_attempts = Some(attempts);
                api
            }
            other => ApiError::new(code, other.to_string()),
        }
    }
}
