//! Per-session cancellation tokens.
//!
//! Each running turn gets a `CancelToken`. Calling `cancel()` on it
//! signals the orchestrator to stop the current turn cleanly at the
//! next checkpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token that can be checked by the turn loop.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per session.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a session.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session. Returns true if a token
    /// was found.
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token for a session (called when a turn completes).
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    /// Check if a session has an active (running) turn.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("s1"));

        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1")); // no longer registered
    }

    #[test]
    fn cancel_nonexistent_session_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("does_not_exist"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("s1");
        map.remove("s1");
        // Second remove should not panic.
        map.remove("s1");
        assert!(!map.is_running("s1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old_token = map.register("s1");
        let new_token = map.register("s1");

        map.cancel("s1");
        assert!(new_token.is_cancelled());
        // Old token is orphaned; it does not get cancelled via the map.
        assert!(!old_token.is_cancelled());
    }

    #[test]
    fn cancel_token_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
