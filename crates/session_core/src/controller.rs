//! The session lifecycle controller.
//!
//! One actor task owns the session handle, the state machine, the reconnect
//! scheduler and the keepalive monitor. Session events, timer firings,
//! initialize outcomes and gateway commands all arrive on a single ordered
//! inbox, so no two of them ever mutate state concurrently. Callers talk to
//! the actor through a cloneable [`ControllerHandle`]; status reads come
//! from a published snapshot and never wait on the actor.

use std::{sync::Arc, time::Duration};

use session_integration::{
    MessagingSession, QrDisplay, SessionConnector, SessionEvent, SessionEventSink,
    SessionStoreConfig,
};
use shared::{
    domain::{AccountInfo, GatewayStatus, SessionState},
    error::GatewayError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::BackoffTable,
    keepalive::{KeepaliveMonitor, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_PROBE_TIMEOUT},
    lock::remove_stale_lock,
    reconnect::{ReconnectScheduler, DEFAULT_MAX_ATTEMPTS},
};

pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DESTROY_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do after the session reports rejected credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFailurePolicy {
    /// Stay in `failed` until an operator triggers a manual reconnect, which
    /// starts a fresh login (new QR code).
    #[default]
    RequireRescan,
    /// Treat the failure like a disconnect and enter the bounded retry path.
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_attempts: u32,
    pub backoff: BackoffTable,
    pub keepalive_interval: Duration,
    pub probe_timeout: Duration,
    pub initialize_timeout: Duration,
    pub destroy_timeout: Duration,
    pub auth_failure_policy: AuthFailurePolicy,
    pub store: SessionStoreConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffTable::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            destroy_timeout: DEFAULT_DESTROY_TIMEOUT,
            auth_failure_policy: AuthFailurePolicy::default(),
            store: SessionStoreConfig::default(),
        }
    }
}

type InitializeReply = oneshot::Sender<Result<(), GatewayError>>;

pub(crate) enum ControllerMessage {
    /// `generation: None` targets whatever handle is current.
    Session {
        generation: Option<u64>,
        event: SessionEvent,
    },
    SessionCreated {
        generation: u64,
        session: Arc<dyn MessagingSession>,
    },
    InitializeFinished {
        generation: u64,
        outcome: Result<(), String>,
    },
    ReconnectTimerFired {
        token: u64,
    },
    Initialize {
        manual: bool,
        reply: InitializeReply,
    },
    ReadySession {
        reply: oneshot::Sender<Result<Arc<dyn MessagingSession>, GatewayError>>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct ControllerHandle {
    inbox: mpsc::UnboundedSender<ControllerMessage>,
    status: watch::Receiver<GatewayStatus>,
}

impl ControllerHandle {
    /// Starts the controller actor. No session exists until
    /// [`ControllerHandle::initialize`] is called.
    pub fn spawn(
        config: ControllerConfig,
        connector: Arc<dyn SessionConnector>,
        qr_display: Arc<dyn QrDisplay>,
    ) -> Self {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(GatewayStatus::initial(config.max_attempts));
        let controller = LifecycleController::new(config, connector, qr_display, inbox.clone(), status_tx);
        tokio::spawn(controller.run(inbox_rx));
        Self { inbox, status }
    }

    pub fn status(&self) -> GatewayStatus {
        self.status.borrow().clone()
    }

    pub fn current_state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn account_info(&self) -> Option<AccountInfo> {
        self.status.borrow().account.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GatewayStatus> {
        self.status.clone()
    }

    /// Starts a session attempt without resetting the attempt counter and
    /// resolves with its outcome. Failures have already been handed to the
    /// reconnect scheduler when this returns.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        self.request_initialize(false).await
    }

    /// Operator-triggered reconnect: resets the attempt counter and starts a
    /// session attempt immediately, bypassing the backoff delay.
    pub async fn manual_reconnect(&self) -> Result<(), GatewayError> {
        self.request_initialize(true).await
    }

    /// Feeds a lifecycle event to the current session attempt.
    pub fn handle_event(&self, event: SessionEvent) {
        let _ = self.inbox.send(ControllerMessage::Session {
            generation: None,
            event,
        });
    }

    /// Returns the current handle when the session is ready.
    pub async fn ready_session(&self) -> Result<Arc<dyn MessagingSession>, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::ReadySession { reply })?;
        rx.await.map_err(|_| controller_gone())?
    }

    /// Tears down the session and all timers. The controller stays usable
    /// and reports `uninitialized` until the next initialize.
    pub async fn destroy(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(ControllerMessage::Destroy { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Resolves once every message queued before this call was handled.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(ControllerMessage::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request_initialize(&self, manual: bool) -> Result<(), GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerMessage::Initialize { manual, reply })?;
        rx.await.map_err(|_| controller_gone())?
    }

    fn send(&self, message: ControllerMessage) -> Result<(), GatewayError> {
        self.inbox.send(message).map_err(|_| controller_gone())
    }
}

fn controller_gone() -> GatewayError {
    GatewayError::Internal("session controller is not running".into())
}

struct InFlight {
    generation: u64,
    reply: Option<InitializeReply>,
}

struct LifecycleController {
    config: ControllerConfig,
    connector: Arc<dyn SessionConnector>,
    qr_display: Arc<dyn QrDisplay>,
    inbox: mpsc::UnboundedSender<ControllerMessage>,
    status: watch::Sender<GatewayStatus>,
    state: SessionState,
    session: Option<Arc<dyn MessagingSession>>,
    generation: u64,
    initializing: Option<InFlight>,
    account: Option<AccountInfo>,
    last_qr: Option<String>,
    reconnect: ReconnectScheduler,
    keepalive: KeepaliveMonitor,
}

impl LifecycleController {
    fn new(
        config: ControllerConfig,
        connector: Arc<dyn SessionConnector>,
        qr_display: Arc<dyn QrDisplay>,
        inbox: mpsc::UnboundedSender<ControllerMessage>,
        status: watch::Sender<GatewayStatus>,
    ) -> Self {
        let reconnect =
            ReconnectScheduler::new(config.backoff.clone(), config.max_attempts, inbox.clone());
        let keepalive = KeepaliveMonitor::new(config.keepalive_interval, config.probe_timeout);
        Self {
            config,
            connector,
            qr_display,
            inbox,
            status,
            state: SessionState::Uninitialized,
            session: None,
            generation: 0,
            initializing: None,
            account: None,
            last_qr: None,
            reconnect,
            keepalive,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ControllerMessage>) {
        while let Some(message) = inbox.recv().await {
            self.dispatch(message).await;
            self.publish();
        }
    }

    async fn dispatch(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Session { generation, event } => {
                if generation.is_some_and(|generation| generation != self.generation) {
                    debug!(event = event.name(), "ignoring event from a replaced session");
                    return;
                }
                self.handle_event(event);
            }
            ControllerMessage::SessionCreated {
                generation,
                session,
            } => {
                if generation == self.generation {
                    self.session = Some(session);
                } else {
                    // Superseded by destroy while it was being built.
                    tokio::spawn(destroy_best_effort(session, self.config.destroy_timeout));
                }
            }
            ControllerMessage::InitializeFinished {
                generation,
                outcome,
            } => self.initialize_finished(generation, outcome),
            ControllerMessage::ReconnectTimerFired { token } => self.reconnect_timer_fired(token),
            ControllerMessage::Initialize { manual, reply } => self.request_initialize(manual, reply),
            ControllerMessage::ReadySession { reply } => {
                let session = match (&self.session, self.state) {
                    (Some(session), SessionState::Ready) => Ok(Arc::clone(session)),
                    _ => Err(GatewayError::NotReady { state: self.state }),
                };
                let _ = reply.send(session);
            }
            ControllerMessage::Destroy { reply } => {
                self.destroy().await;
                self.publish();
                let _ = reply.send(());
            }
            ControllerMessage::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&self) {
        let account = self.account.clone().filter(|_| self.state.is_ready());
        self.status.send_if_modified(|status| {
            let next = GatewayStatus {
                state: self.state,
                is_reconnecting: self.is_reconnecting(),
                attempt_count: self.reconnect.attempt_count(),
                max_attempts: self.reconnect.max_attempts(),
                account,
            };
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    /// Shared by the status snapshot and the `ReconnectInProgress` check.
    fn is_reconnecting(&self) -> bool {
        self.reconnect.is_reconnecting() || self.initializing.is_some()
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if self.state == SessionState::Ready {
            self.keepalive.stop();
            self.account = None;
        }
        debug!(from = %self.state, to = %next, "session state transition");
        self.state = next;
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Qr { code } => {
                self.set_state(SessionState::AwaitingScan);
                if self.last_qr.as_deref() != Some(code.as_str()) {
                    info!("login QR code received");
                    self.qr_display.show(&code);
                    self.last_qr = Some(code);
                }
            }
            SessionEvent::Authenticated => {
                info!("session authenticated");
                self.set_state(SessionState::Authenticated);
            }
            SessionEvent::AuthFailure { reason } => {
                error!(%reason, "session authentication failed");
                self.set_state(SessionState::Failed);
                match self.config.auth_failure_policy {
                    AuthFailurePolicy::RequireRescan => {
                        warn!("credentials were rejected; a manual reconnect is required to log in again");
                        if self.initializing.is_none() {
                            self.reconnect.cancel();
                        }
                    }
                    AuthFailurePolicy::Reconnect => {
                        if self.initializing.is_none() {
                            self.reconnect.abandon_attempt();
                            self.schedule_reconnect("auth_failure");
                        }
                    }
                }
            }
            SessionEvent::Ready { info } => {
                let Some(session) = self.session.clone() else {
                    warn!("ignoring ready event: no session has been created");
                    return;
                };
                self.set_state(SessionState::Ready);
                match &info {
                    Some(info) => info!(
                        name = %info.display_name,
                        user = %info.user_id,
                        platform = %info.platform,
                        "session ready"
                    ),
                    None => info!("session ready"),
                }
                self.account = info;
                self.reconnect.on_ready(self.initializing.is_some());
                self.keepalive.start(session, self.status.subscribe());
            }
            SessionEvent::Disconnected { reason } => {
                warn!(%reason, "session disconnected");
                self.set_state(SessionState::Disconnected);
                if self.initializing.is_some() {
                    // The outstanding initialize decides what happens next.
                    return;
                }
                self.reconnect.abandon_attempt();
                self.schedule_reconnect(&reason);
            }
            SessionEvent::StateChanged { state } => info!(%state, "session reported state change"),
            SessionEvent::LoadingScreen { percent, message } => {
                debug!(percent, %message, "session loading")
            }
            SessionEvent::MessageCreated { from_me, to, body } => {
                if from_me {
                    info!(%to, %body, "message sent from this account");
                }
            }
            SessionEvent::MessageReceived { from, body } => {
                debug!(%from, %body, "message received")
            }
        }
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        match self.reconnect.schedule(reason) {
            Ok(Some(armed)) => info!(
                attempt = armed.attempt,
                max_attempts = self.reconnect.max_attempts(),
                delay_ms = armed.delay.as_millis() as u64,
                %reason,
                "reconnect scheduled"
            ),
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "automatic reconnect stopped; session credentials are kept on disk");
                self.set_state(SessionState::Failed);
            }
        }
    }

    fn request_initialize(&mut self, manual: bool, reply: InitializeReply) {
        if self.is_reconnecting() {
            let _ = reply.send(Err(GatewayError::ReconnectInProgress {
                attempts: self.reconnect.attempt_count(),
            }));
            return;
        }
        if manual {
            info!("manual reconnect requested");
            self.reconnect.reset_attempts();
        }
        self.reconnect.begin_initialize();
        self.start_initialize(Some(reply));
    }

    fn reconnect_timer_fired(&mut self, token: u64) {
        if !self.reconnect.fire(token) {
            debug!(token, "ignoring stale reconnect timer");
            return;
        }
        if self.initializing.is_some() {
            debug!("an initialize is still outstanding; its outcome resolves this attempt");
            return;
        }
        info!(attempt = self.reconnect.attempt_count(), "reconnecting session");
        self.start_initialize(None);
    }

    fn start_initialize(&mut self, reply: Option<InitializeReply>) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(SessionState::Initializing);
        self.last_qr = None;

        let lock_path = self.config.store.lock_artifact_path();
        match remove_stale_lock(&lock_path) {
            Ok(true) => info!(path = %lock_path.display(), "removed stale session lock"),
            Ok(false) => {}
            Err(error) => warn!(path = %lock_path.display(), %error, "failed to remove stale session lock"),
        }

        let previous = self.session.take();
        let connector = Arc::clone(&self.connector);
        let sink = self.event_sink(generation);
        let inbox = self.inbox.clone();
        let initialize_timeout = self.config.initialize_timeout;
        let destroy_timeout = self.config.destroy_timeout;
        self.initializing = Some(InFlight { generation, reply });

        tokio::spawn(async move {
            if let Some(previous) = previous {
                destroy_best_effort(previous, destroy_timeout).await;
            }
            let session = match connector.create_session(sink) {
                Ok(session) => session,
                Err(error) => {
                    let _ = inbox.send(ControllerMessage::InitializeFinished {
                        generation,
                        outcome: Err(format!("failed to create session: {error:#}")),
                    });
                    return;
                }
            };
            let _ = inbox.send(ControllerMessage::SessionCreated {
                generation,
                session: Arc::clone(&session),
            });
            let outcome = match tokio::time::timeout(initialize_timeout, session.initialize()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(format!("{error:#}")),
                Err(_) => Err(format!("initialize timed out after {initialize_timeout:?}")),
            };
            let _ = inbox.send(ControllerMessage::InitializeFinished {
                generation,
                outcome,
            });
        });
    }

    fn initialize_finished(&mut self, generation: u64, outcome: Result<(), String>) {
        let in_flight = match self.initializing.take() {
            Some(in_flight) if in_flight.generation == generation => in_flight,
            other => {
                self.initializing = other;
                debug!(generation, "ignoring outcome of a replaced initialize");
                return;
            }
        };

        let result = match outcome {
            Ok(()) => {
                info!("session initialized");
                self.reconnect.initialize_succeeded();
                match (self.state, self.config.auth_failure_policy) {
                    (SessionState::Disconnected, _)
                    | (SessionState::Failed, AuthFailurePolicy::Reconnect) => {
                        self.reconnect.abandon_attempt();
                        self.schedule_reconnect("session dropped during initialize");
                    }
                    (SessionState::Failed, AuthFailurePolicy::RequireRescan) => self.reconnect.cancel(),
                    _ => {}
                }
                Ok(())
            }
            Err(reason) => {
                self.reconnect.initialize_failed();
                warn!(%reason, attempt = self.reconnect.attempt_count(), "session initialize failed");
                if self.state != SessionState::Ready {
                    self.set_state(SessionState::Disconnected);
                    self.schedule_reconnect("initialize failed");
                }
                Err(GatewayError::SessionTransport(reason))
            }
        };

        self.publish();
        if let Some(reply) = in_flight.reply {
            let _ = reply.send(result);
        }
    }

    async fn destroy(&mut self) {
        self.reconnect.cancel();
        self.keepalive.stop();
        self.generation += 1;
        if let Some(in_flight) = self.initializing.take() {
            if let Some(reply) = in_flight.reply {
                let _ = reply.send(Err(GatewayError::SessionTransport(
                    "session was destroyed while initializing".into(),
                )));
            }
        }
        self.set_state(SessionState::Uninitialized);
        self.account = None;
        self.last_qr = None;
        if let Some(session) = self.session.take() {
            destroy_best_effort(session, self.config.destroy_timeout).await;
            info!("session destroyed");
        }
    }

    fn event_sink(&self, generation: u64) -> SessionEventSink {
        let inbox = self.inbox.clone();
        SessionEventSink::new(move |event| {
            let _ = inbox.send(ControllerMessage::Session {
                generation: Some(generation),
                event,
            });
        })
    }
}

async fn destroy_best_effort(session: Arc<dyn MessagingSession>, limit: Duration) {
    match tokio::time::timeout(limit, session.destroy()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(error = %format!("{error:#}"), "failed to destroy previous session"),
        Err(_) => warn!(timeout = ?limit, "destroying previous session timed out"),
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
