use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id_newtype!(ChatId);
string_id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    AwaitingScan,
    Authenticated,
    Ready,
    Disconnected,
    Failed,
}

impl SessionState {
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::AwaitingScan => "awaiting_scan",
            SessionState::Authenticated => "authenticated",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the logged-in account, reported by the session on `ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub display_name: String,
    pub user_id: String,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub body: String,
    pub timestamp: i64,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: String,
    pub is_group: bool,
    pub unread_count: u32,
    pub last_message: Option<LastMessage>,
}

/// Receipt returned by the session's send capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: MessageId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub message_id: MessageId,
    pub timestamp: i64,
    pub recipient: String,
}

/// Point-in-time view of the lifecycle controller. Always answerable without
/// touching the session resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub state: SessionState,
    pub is_reconnecting: bool,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub account: Option<AccountInfo>,
}

impl GatewayStatus {
    pub fn initial(max_attempts: u32) -> Self {
        Self {
            state: SessionState::Uninitialized,
            is_reconnecting: false,
            attempt_count: 0,
            max_attempts,
            account: None,
        }
    }
}
