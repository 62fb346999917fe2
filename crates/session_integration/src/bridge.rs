//! Session handle backed by a sidecar process reached over a WebSocket.
//!
//! The sidecar owns the browser session and speaks a small JSON protocol:
//! requests carry a numeric id answered by exactly one `response` frame, and
//! lifecycle events are pushed unsolicited in emission order.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::domain::{AccountInfo, ChatId, ChatSummary, SentMessage};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::{MessagingSession, SessionConnector, SessionEvent, SessionEventSink, SessionStoreConfig};

pub const BRIDGE_CLOSED_REASON: &str = "bridge connection closed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum BridgeCall {
    Initialize { data_path: String, client_id: String },
    Destroy,
    SendMessage { chat_id: ChatId, text: String },
    GetNumberId { number: String },
    GetChats,
    GetState,
}

impl BridgeCall {
    fn name(&self) -> &'static str {
        match self {
            BridgeCall::Initialize { .. } => "initialize",
            BridgeCall::Destroy => "destroy",
            BridgeCall::SendMessage { .. } => "send_message",
            BridgeCall::GetNumberId { .. } => "get_number_id",
            BridgeCall::GetChats => "get_chats",
            BridgeCall::GetState => "get_state",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BridgeOutbound {
    Request { id: u64, call: BridgeCall },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum BridgeInbound {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Qr {
        code: String,
    },
    Authenticated,
    AuthFailure {
        reason: String,
    },
    Ready {
        #[serde(default)]
        info: Option<AccountInfo>,
    },
    Disconnected {
        reason: String,
    },
    ChangeState {
        state: String,
    },
    LoadingScreen {
        percent: u8,
        #[serde(default)]
        message: String,
    },
    MessageCreate {
        from_me: bool,
        to: String,
        body: String,
    },
    Message {
        from: String,
        body: String,
    },
}

impl BridgeInbound {
    fn into_event(self) -> Option<SessionEvent> {
        let event = match self {
            BridgeInbound::Response { .. } => return None,
            BridgeInbound::Qr { code } => SessionEvent::Qr { code },
            BridgeInbound::Authenticated => SessionEvent::Authenticated,
            BridgeInbound::AuthFailure { reason } => SessionEvent::AuthFailure { reason },
            BridgeInbound::Ready { info } => SessionEvent::Ready { info },
            BridgeInbound::Disconnected { reason } => SessionEvent::Disconnected { reason },
            BridgeInbound::ChangeState { state } => SessionEvent::StateChanged { state },
            BridgeInbound::LoadingScreen { percent, message } => {
                SessionEvent::LoadingScreen { percent, message }
            }
            BridgeInbound::MessageCreate { from_me, to, body } => {
                SessionEvent::MessageCreated { from_me, to, body }
            }
            BridgeInbound::Message { from, body } => SessionEvent::MessageReceived { from, body },
        };
        Some(event)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: Url,
    pub store: SessionStoreConfig,
    /// Upper bound for every call except `initialize`, which the lifecycle
    /// controller bounds itself.
    pub request_timeout: Duration,
}

pub struct BridgeConnector {
    config: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl SessionConnector for BridgeConnector {
    fn create_session(&self, events: SessionEventSink) -> Result<Arc<dyn MessagingSession>> {
        Ok(Arc::new(BridgeSession::new(self.config.clone(), events)))
    }
}

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

struct BridgeLink {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct BridgeSession {
    config: BridgeConfig,
    events: SessionEventSink,
    next_id: AtomicU64,
    waiters: Waiters,
    closing: Arc<AtomicBool>,
    link: Mutex<Option<BridgeLink>>,
}

impl BridgeSession {
    pub fn new(config: BridgeConfig, events: SessionEventSink) -> Self {
        Self {
            config,
            events,
            next_id: AtomicU64::new(1),
            waiters: Arc::new(Mutex::new(HashMap::new())),
            closing: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            bail!("bridge session is already open");
        }

        let (socket, _) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .with_context(|| format!("failed to connect to session bridge at {}", self.config.url))?;
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(error) = sink.send(message).await {
                    warn!(%error, "session bridge write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let waiters = Arc::clone(&self.waiters);
        let closing = Arc::clone(&self.closing);
        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        warn!(%error, "session bridge read failed");
                        break;
                    }
                };
                match serde_json::from_str::<BridgeInbound>(&text) {
                    Ok(BridgeInbound::Response { id, result, error }) => {
                        let Some(waiter) = waiters.lock().await.remove(&id) else {
                            debug!(id, "dropping response for unknown bridge request");
                            continue;
                        };
                        let outcome = match error {
                            Some(error) => Err(error),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    }
                    Ok(inbound) => {
                        if let Some(event) = inbound.into_event() {
                            events.emit(event);
                        }
                    }
                    Err(error) => warn!(%error, "ignoring malformed session bridge frame"),
                }
            }

            // Outstanding callers observe a closed channel.
            waiters.lock().await.clear();
            if !closing.load(Ordering::SeqCst) {
                events.emit(SessionEvent::Disconnected {
                    reason: BRIDGE_CLOSED_REASON.to_string(),
                });
            }
        });

        *link = Some(BridgeLink {
            outbound,
            reader,
            writer,
        });
        Ok(())
    }

    async fn call(&self, call: BridgeCall, limit: Option<Duration>) -> Result<Value> {
        let method = call.name();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let link = self.link.lock().await;
            let link = link
                .as_ref()
                .ok_or_else(|| anyhow!("session bridge is not open"))?;
            self.waiters.lock().await.insert(id, tx);
            let frame = serde_json::to_string(&BridgeOutbound::Request { id, call })?;
            if link.outbound.send(Message::Text(frame)).is_err() {
                self.waiters.lock().await.remove(&id);
                bail!("session bridge writer has stopped");
            }
        }

        let reply = match limit {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.waiters.lock().await.remove(&id);
                    bail!("bridge call `{method}` timed out after {limit:?}");
                }
            },
            None => rx.await,
        };

        reply
            .map_err(|_| anyhow!("session bridge closed before answering `{method}`"))?
            .map_err(|error| anyhow!("bridge call `{method}` failed: {error}"))
    }

    async fn call_as<T: DeserializeOwned>(&self, call: BridgeCall) -> Result<T> {
        let method = call.name();
        let value = self.call(call, Some(self.config.request_timeout)).await?;
        serde_json::from_value(value)
            .with_context(|| format!("unexpected result shape for bridge call `{method}`"))
    }
}

#[async_trait]
impl MessagingSession for BridgeSession {
    async fn initialize(&self) -> Result<()> {
        self.closing.store(false, Ordering::SeqCst);
        self.open().await?;
        let store = &self.config.store;
        self.call(
            BridgeCall::Initialize {
                data_path: store.data_dir.display().to_string(),
                client_id: store.client_id.clone(),
            },
            None,
        )
        .await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        let is_open = self.link.lock().await.is_some();
        let outcome = if is_open {
            self.call(BridgeCall::Destroy, Some(self.config.request_timeout))
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        if let Some(link) = self.link.lock().await.take() {
            // Dropping the sender lets the writer flush and close the socket.
            drop(link.outbound);
            let _ = link.writer.await;
            link.reader.abort();
        }
        outcome
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<SentMessage> {
        self.call_as(BridgeCall::SendMessage {
            chat_id: chat_id.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn get_number_id(&self, number: &str) -> Result<Option<ChatId>> {
        self.call_as(BridgeCall::GetNumberId {
            number: number.to_string(),
        })
        .await
    }

    async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        self.call_as(BridgeCall::GetChats).await
    }

    async fn get_state(&self) -> Result<String> {
        self.call_as(BridgeCall::GetState).await
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
