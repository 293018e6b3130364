//! Turn orchestration core.
//!
//! Owns the per-turn state machine: history management, tool dispatch,
//! response normalization, protocol monitoring, and event streaming.
//! Transport (HTTP/SSE) lives in the gateway crate; engine adapters in
//! the providers crate.

pub mod cancel;
pub mod history;
pub mod normalize;
pub mod protocol;
pub mod session_lock;
pub mod sessions;
pub mod tools;
pub mod turn;
