//! Connection draining for graceful shutdown
//!
//! Tracks live proxied connections so shutdown can stop accepting and then
//! wait, up to a limit, for the rest to finish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counts active connections
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    max_drain_time: Duration,
}

/// Keeps a connection counted until dropped
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(active_connections = count, "Connection closed");
    }
}

impl ConnectionTracker {
    pub fn new(max_drain_time: Duration) -> Self {
        debug!(
            max_drain_time_secs = max_drain_time.as_secs(),
            "Creating connection tracker"
        );
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max_drain_time,
        }
    }

    /// Count a new connection
    pub fn track(&self) -> ConnectionGuard {
        let count = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(active_connections = count, "Connection opened");
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Wait for active connections to finish
    ///
    /// Returns `false` if the drain limit passed with connections still open.
    pub async fn wait_for_drain(&self) -> bool {
        let start = Instant::now();
        let initial = self.active_count();

        info!(
            active_connections = initial,
            max_drain_time_secs = self.max_drain_time.as_secs(),
            "Draining connections"
        );

        let mut last_logged = initial;
        loop {
            let current = self.active_count();
            if current == 0 {
                break;
            }

            if start.elapsed() > self.max_drain_time {
                warn!(
                    remaining_connections = current,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Drain timeout reached, connections still active"
                );
                return false;
            }

            if current != last_logged {
                debug!(
                    remaining_connections = current,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Draining connections"
                );
                last_logged = current;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!(
            elapsed_ms = start.elapsed().as_millis(),
            initial_connections = initial,
            "All connections drained"
        );
        true
    }
}
