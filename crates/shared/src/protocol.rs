use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountInfo, ChatSummary, GatewayStatus, MessageId, SendOutcome, SessionState};

/// Body of `POST /api/send-message`. Fields are optional so that a missing
/// field is reported as a validation error instead of a body rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessagePayload {
    pub message_id: MessageId,
    pub timestamp: i64,
    pub to: String,
}

impl From<SendOutcome> for SentMessagePayload {
    fn from(value: SendOutcome) -> Self {
        Self {
            message_id: value.message_id,
            timestamp: value.timestamp,
            to: value.recipient,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub data: SentMessagePayload,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfoPayload {
    pub name: String,
    pub phone: String,
    pub platform: String,
}

impl From<AccountInfo> for AccountInfoPayload {
    fn from(value: AccountInfo) -> Self {
        Self {
            name: value.display_name,
            phone: value.user_id,
            platform: value.platform,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub reconnecting: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub state: SessionState,
    pub info: Option<AccountInfoPayload>,
    pub timestamp: DateTime<Utc>,
}

impl StatusResponse {
    pub fn from_status(status: GatewayStatus, timestamp: DateTime<Utc>) -> Self {
        let connected = status.state.is_ready();
        Self {
            connected,
            reconnecting: status.is_reconnecting,
            reconnect_attempts: status.attempt_count,
            max_reconnect_attempts: status.max_attempts,
            state: status.state,
            info: status
                .account
                .filter(|_| connected)
                .map(AccountInfoPayload::from),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatsResponse {
    pub success: bool,
    pub data: Vec<ChatSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub error: String,
    pub path: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
