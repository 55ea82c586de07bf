//! Shared daemon state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

/// Shared handle to daemon runtime state.
pub type SharedState = Arc<DaemonState>;

/// Daemon runtime state: shutdown coordination and start time.
pub struct DaemonState {
    /// Shutdown flag (atomic for lock-free checking from the sweeper).
    shutdown: AtomicBool,
    /// Time when the daemon started.
    started_at: DateTime<Utc>,
}

impl DaemonState {
    /// Creates a new state handle.
    #[must_use]
    pub fn new() -> SharedState {
        Arc::new(Self {
            shutdown: AtomicBool::new(false),
            started_at: Utc::now(),
        })
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown; the sweeper exits at its next tick.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Get the daemon start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
