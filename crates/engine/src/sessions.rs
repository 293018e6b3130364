//! In-memory session registry.
//!
//! Each session key maps to an owned [`Session`] holding the message
//! history. Entries are created on first use with the system prompt
//! seeded at index 0. Sessions live for the process lifetime only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use pmm_domain::message::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single conversation tracked by the registry.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// Number of turns whose user message has been committed. Unlike a
    /// count over `messages`, this survives truncation, so it is the
    /// zero-based index of the next turn.
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of live sessions, keyed by session ID.
///
/// The outer map lock is held only for lookup/insert; per-session
/// state is mutated under the entry's own lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<RwLock<Session>>>>,
    system_prompt: String,
}

impl SessionRegistry {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            system_prompt: system_prompt.into(),
        }
    }

    /// Resolve or create the session for the given ID.
    ///
    /// New sessions are seeded with the system prompt as message 0.
    pub fn get_or_create(&self, session_id: &str) -> Arc<RwLock<Session>> {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(session_id) {
                return entry.clone();
            }
        }

        // Slow path: create new session.
        let now = Utc::now();
        let session = Arc::new(RwLock::new(Session {
            session_id: session_id.to_owned(),
            messages: vec![Message::system(self.system_prompt.clone())],
            turn_count: 0,
            created_at: now,
            last_active: now,
        }));

        let mut sessions = self.sessions.write();
        // Another caller may have raced us; keep whichever got in first.
        sessions
            .entry(session_id.to_owned())
            .or_insert(session)
            .clone()
    }

    /// Look up a session without creating it.
    pub fn get(&self, session_id: &str) -> Option<Arc<RwLock<Session>>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Remove a session. Returns true if it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            tracing::info!(session_id = session_id, "session deleted");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}
