//! Single-flight reconnect bookkeeping: the attempt counter and the one
//! pending reconnect timer.

use std::time::Duration;

use shared::error::GatewayError;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{backoff::BackoffTable, controller::ControllerMessage};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedReconnect {
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug)]
enum Cycle {
    Idle,
    Armed { token: u64, timer: JoinHandle<()> },
    /// `retry` is set when a backoff timer opened this cycle.
    Initializing { retry: bool },
    /// A retry's initialize resolved; the session has not reported `ready`.
    AwaitingReady,
}

pub struct ReconnectScheduler {
    table: BackoffTable,
    max_attempts: u32,
    attempt_count: u32,
    cycle: Cycle,
    next_token: u64,
    inbox: mpsc::UnboundedSender<ControllerMessage>,
}

impl ReconnectScheduler {
    pub(crate) fn new(
        table: BackoffTable,
        max_attempts: u32,
        inbox: mpsc::UnboundedSender<ControllerMessage>,
    ) -> Self {
        Self {
            table,
            max_attempts,
            attempt_count: 0,
            cycle: Cycle::Idle,
            next_token: 0,
            inbox,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True from the moment a cycle opens until `ready`, a permanent stop or
    /// a cancel closes it.
    pub fn is_reconnecting(&self) -> bool {
        !matches!(self.cycle, Cycle::Idle)
    }

    pub fn has_pending_timer(&self) -> bool {
        matches!(self.cycle, Cycle::Armed { .. })
    }

    pub fn is_initializing(&self) -> bool {
        matches!(self.cycle, Cycle::Initializing { .. })
    }

    pub fn is_awaiting_ready(&self) -> bool {
        matches!(self.cycle, Cycle::AwaitingReady)
    }

    /// Arms the next reconnect attempt.
    ///
    /// Returns `Ok(None)` when a cycle is already open and
    /// [`GatewayError::MaxAttemptsExceeded`] once the budget is spent.
    pub(crate) fn schedule(&mut self, reason: &str) -> Result<Option<ArmedReconnect>, GatewayError> {
        if self.is_reconnecting() {
            debug!(%reason, "reconnect already in progress; not scheduling another");
            return Ok(None);
        }
        if self.attempt_count >= self.max_attempts {
            return Err(GatewayError::MaxAttemptsExceeded {
                max: self.max_attempts,
            });
        }

        self.attempt_count += 1;
        let delay = self.table.delay_for(self.attempt_count);
        self.next_token += 1;
        let token = self.next_token;
        let inbox = self.inbox.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(ControllerMessage::ReconnectTimerFired { token });
        });
        self.cycle = Cycle::Armed { token, timer };

        Ok(Some(ArmedReconnect {
            attempt: self.attempt_count,
            delay,
        }))
    }

    /// Consumes a timer firing. Stale tokens (cancelled or superseded timers)
    /// are rejected.
    pub(crate) fn fire(&mut self, token: u64) -> bool {
        match &self.cycle {
            Cycle::Armed { token: armed, .. } if *armed == token => {
                self.cycle = Cycle::Initializing { retry: true };
                true
            }
            _ => false,
        }
    }

    /// Opens a cycle for an initialize started outside the timer path
    /// (startup or manual reconnect).
    pub(crate) fn begin_initialize(&mut self) {
        self.cancel_timer();
        self.cycle = Cycle::Initializing { retry: false };
    }

    pub(crate) fn reset_attempts(&mut self) {
        self.attempt_count = 0;
    }

    /// A retry keeps its cycle open until the session reports `ready`; a
    /// startup or manual initialize closes it here.
    pub(crate) fn initialize_succeeded(&mut self) {
        match self.cycle {
            Cycle::Initializing { retry: true } => self.cycle = Cycle::AwaitingReady,
            Cycle::Initializing { retry: false } => self.cycle = Cycle::Idle,
            _ => {}
        }
    }

    pub(crate) fn initialize_failed(&mut self) {
        if self.is_initializing() {
            self.cycle = Cycle::Idle;
        }
    }

    /// Closes a cycle whose session dropped before reaching `ready`, so the
    /// next attempt can be scheduled. A pending timer is left alone.
    pub(crate) fn abandon_attempt(&mut self) {
        if self.is_awaiting_ready() {
            self.cycle = Cycle::Idle;
        }
    }

    /// `initialize_in_flight` keeps the cycle open until that call resolves.
    pub(crate) fn on_ready(&mut self, initialize_in_flight: bool) {
        self.cancel();
        if initialize_in_flight {
            self.cycle = Cycle::Initializing { retry: false };
        }
        self.attempt_count = 0;
    }

    /// Drops any pending timer and closes the current cycle.
    pub fn cancel(&mut self) {
        self.cancel_timer();
        self.cycle = Cycle::Idle;
    }

    fn cancel_timer(&mut self) {
        if let Cycle::Armed { timer, .. } = std::mem::replace(&mut self.cycle, Cycle::Idle) {
            timer.abort();
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
#[path = "tests/reconnect_tests.rs"]
mod tests;
