//! HTTP gateway for the product marketing agent.
//!
//! Hosts the turn orchestrator behind an Axum API: chat (buffered and
//! SSE), session management, and protocol metrics.

pub mod api;
pub mod bootstrap;
pub mod state;
