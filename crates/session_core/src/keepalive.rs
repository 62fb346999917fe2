use std::{sync::Arc, time::Duration};

use session_integration::MessagingSession;
use shared::domain::GatewayStatus;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodic liveness probe, running only while the session is ready.
///
/// Probe failures are advisory: they are logged and never change the
/// lifecycle state, which follows the session's own `disconnected` events.
pub struct KeepaliveMonitor {
    interval: Duration,
    probe_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl KeepaliveMonitor {
    pub fn new(interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            interval,
            probe_timeout,
            task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(
        &mut self,
        session: Arc<dyn MessagingSession>,
        status: watch::Receiver<GatewayStatus>,
    ) {
        self.stop();
        let period = self.interval;
        let probe_timeout = self.probe_timeout;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !status.borrow().state.is_ready() {
                    continue;
                }
                match tokio::time::timeout(probe_timeout, session.get_state()).await {
                    Ok(Ok(state)) => debug!(%state, "keepalive: session is alive"),
                    Ok(Err(error)) => warn!(error = %format!("{error:#}"), "keepalive probe failed"),
                    Err(_) => warn!(timeout = ?probe_timeout, "keepalive probe timed out"),
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/keepalive_tests.rs"]
mod tests;
