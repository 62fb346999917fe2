//! Contract between the gateway and the external messaging session.
//!
//! The session itself (browser automation, protocol transport) lives outside
//! this workspace. The gateway only sees it through [`MessagingSession`],
//! builds fresh handles with a [`SessionConnector`] and receives lifecycle
//! callbacks through a [`SessionEventSink`].

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use shared::domain::{AccountInfo, ChatId, ChatSummary, SentMessage};

pub mod bridge;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Qr { code: String },
    Authenticated,
    AuthFailure { reason: String },
    Ready { info: Option<AccountInfo> },
    Disconnected { reason: String },
    StateChanged { state: String },
    LoadingScreen { percent: u8, message: String },
    MessageCreated { from_me: bool, to: String, body: String },
    MessageReceived { from: String, body: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Qr { .. } => "qr",
            SessionEvent::Authenticated => "authenticated",
            SessionEvent::AuthFailure { .. } => "auth_failure",
            SessionEvent::Ready { .. } => "ready",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::StateChanged { .. } => "change_state",
            SessionEvent::LoadingScreen { .. } => "loading_screen",
            SessionEvent::MessageCreated { .. } => "message_create",
            SessionEvent::MessageReceived { .. } => "message",
        }
    }
}

/// Where a session handle delivers its lifecycle events. Emission order is
/// preserved by whatever the sink forwards into.
#[derive(Clone)]
pub struct SessionEventSink {
    emit: Arc<dyn Fn(SessionEvent) + Send + Sync>,
}

impl SessionEventSink {
    pub fn new(emit: impl Fn(SessionEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        (self.emit)(event);
    }
}

impl fmt::Debug for SessionEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventSink").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MessagingSession: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;
    async fn destroy(&self) -> anyhow::Result<()>;
    async fn send_message(&self, chat_id: &ChatId, text: &str) -> anyhow::Result<SentMessage>;
    async fn get_number_id(&self, number: &str) -> anyhow::Result<Option<ChatId>>;
    async fn get_chats(&self) -> anyhow::Result<Vec<ChatSummary>>;
    /// Liveness probe; returns the session's own connection status string.
    async fn get_state(&self) -> anyhow::Result<String>;
}

pub trait SessionConnector: Send + Sync {
    /// Builds a new, not yet initialized, handle wired to `events`.
    fn create_session(&self, events: SessionEventSink) -> anyhow::Result<Arc<dyn MessagingSession>>;
}

/// Receives login QR codes. Rendering them is up to the implementation.
pub trait QrDisplay: Send + Sync {
    fn show(&self, code: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogQrDisplay;

impl QrDisplay for LogQrDisplay {
    fn show(&self, code: &str) {
        tracing::info!(%code, "scan this QR code with the messaging app to link the session");
    }
}

/// Local directory holding persisted credentials, reused across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStoreConfig {
    pub data_dir: PathBuf,
    pub client_id: String,
    /// Lock left behind by the browser profile after an unclean shutdown,
    /// relative to `data_dir`.
    pub lock_file: PathBuf,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./session"),
            client_id: "bot1".into(),
            lock_file: Path::new("Default").join("SingletonLock"),
        }
    }
}

impl SessionStoreConfig {
    pub fn lock_artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.lock_file)
    }
}
