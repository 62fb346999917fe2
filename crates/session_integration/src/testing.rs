//! Scripted in-memory sessions for exercising the lifecycle controller and
//! the gateway without a sidecar.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use shared::domain::{ChatId, ChatSummary, MessageId, SentMessage};

use crate::{MessagingSession, QrDisplay, SessionConnector, SessionEvent, SessionEventSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitBehavior {
    Succeed,
    Fail(String),
    /// Never resolves; only the controller's timeout ends it.
    Hang,
}

pub struct FakeSession {
    events: SessionEventSink,
    init: InitBehavior,
    registered: HashSet<String>,
    chats: Vec<ChatSummary>,
    sent: Mutex<Vec<(ChatId, String)>>,
    destroyed: AtomicBool,
    probes: AtomicUsize,
    fail_probes: AtomicBool,
    fail_sends: AtomicBool,
}

impl FakeSession {
    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    pub fn sent_messages(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingSession for FakeSession {
    async fn initialize(&self) -> Result<()> {
        match &self.init {
            InitBehavior::Succeed => Ok(()),
            InitBehavior::Fail(reason) => Err(anyhow!("{reason}")),
            InitBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<SentMessage> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("evaluation failed: session page closed");
        }
        let mut sent = self.sent.lock().expect("sent lock");
        sent.push((chat_id.clone(), text.to_string()));
        Ok(SentMessage {
            id: MessageId(format!("true_{}_{}", chat_id, sent.len())),
            timestamp: 1_700_000_000 + sent.len() as i64,
        })
    }

    async fn get_number_id(&self, number: &str) -> Result<Option<ChatId>> {
        Ok(self
            .registered
            .contains(number)
            .then(|| ChatId(format!("{number}@c.us"))))
    }

    async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        Ok(self.chats.clone())
    }

    async fn get_state(&self) -> Result<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probes.load(Ordering::SeqCst) {
            bail!("probe failed");
        }
        Ok("CONNECTED".to_string())
    }
}

/// Hands out [`FakeSession`]s, consuming one scripted [`InitBehavior`] per
/// created handle and falling back to [`InitBehavior::Succeed`].
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<InitBehavior>>,
    registered: Mutex<HashSet<String>>,
    chats: Mutex<Vec<ChatSummary>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_init(&self, behavior: InitBehavior) {
        self.script.lock().expect("script lock").push_back(behavior);
    }

    pub fn register_number(&self, number: impl Into<String>) {
        self.registered
            .lock()
            .expect("registered lock")
            .insert(number.into());
    }

    pub fn set_chats(&self, chats: Vec<ChatSummary>) {
        *self.chats.lock().expect("chats lock") = chats;
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().expect("sessions lock")[index])
    }

    pub fn latest(&self) -> Arc<FakeSession> {
        let sessions = self.sessions.lock().expect("sessions lock");
        Arc::clone(sessions.last().expect("no session created yet"))
    }
}

impl SessionConnector for FakeConnector {
    fn create_session(&self, events: SessionEventSink) -> Result<Arc<dyn MessagingSession>> {
        let init = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(InitBehavior::Succeed);
        let session = Arc::new(FakeSession {
            events,
            init,
            registered: self.registered.lock().expect("registered lock").clone(),
            chats: self.chats.lock().expect("chats lock").clone(),
            sent: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            probes: AtomicUsize::new(0),
            fail_probes: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .expect("sessions lock")
            .push(Arc::clone(&session));
        Ok(session)
    }
}

/// Records every code it is asked to display.
#[derive(Default)]
pub struct RecordingQrDisplay {
    shown: Mutex<Vec<String>>,
}

impl RecordingQrDisplay {
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().expect("shown lock").clone()
    }
}

impl QrDisplay for RecordingQrDisplay {
    fn show(&self, code: &str) {
        self.shown.lock().expect("shown lock").push(code.to_string());
    }
}
