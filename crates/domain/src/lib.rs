//! Shared data model for the PMM agent: messages, tool calls,
//! engine responses, errors, and configuration.

pub mod config;
pub mod error;
pub mod message;
