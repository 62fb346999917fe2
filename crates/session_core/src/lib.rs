//! Session lifecycle management for the gateway: the state machine, bounded
//! reconnects with backoff and the keepalive probe.

pub mod backoff;
pub mod controller;
pub mod keepalive;
pub mod lock;
pub mod reconnect;

pub use backoff::{BackoffError, BackoffTable, DEFAULT_BACKOFF_MS};
pub use controller::{
    AuthFailurePolicy, ControllerConfig, ControllerHandle, DEFAULT_DESTROY_TIMEOUT,
    DEFAULT_INITIALIZE_TIMEOUT,
};
pub use keepalive::{KeepaliveMonitor, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_PROBE_TIMEOUT};
pub use lock::remove_stale_lock;
pub use reconnect::{ArmedReconnect, ReconnectScheduler, DEFAULT_MAX_ATTEMPTS};
