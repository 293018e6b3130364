//! Per-session concurrency control.
//!
//! Ensures only one turn runs per session at a time. A second turn
//! submitted while one is in flight waits for the permit; distinct
//! sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-session turn locks.
///
/// Each session ID maps to a `Semaphore(1)`. Acquiring the permit
/// ensures exclusive access for one turn at a time; it auto-releases
/// on drop.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a session. Waits until the current
    /// turn (if any) finishes. Hold the permit for the duration of the
    /// turn.
    pub async fn acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit, SessionLockClosed> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        sem.acquire_owned().await.map_err(|_| SessionLockClosed)
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks for sessions that aren't actively held (cleanup).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

/// Error returned when a session's semaphore has been closed.
#[derive(Debug)]
pub struct SessionLockClosed;

impl std::fmt::Display for SessionLockClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session lock closed")
    }
}

impl std::error::Error for SessionLockClosed {}
