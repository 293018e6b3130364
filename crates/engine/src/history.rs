//! Conversation history window.
//!
//! Histories are append-only during a turn; the only mutation besides
//! append is truncation of the oldest non-system messages. A system
//! message at index 0 is never evicted.

use pmm_domain::message::{Message, Role};

/// Drop the oldest non-system messages until `messages.len() <= max`.
///
/// The leading system message (index 0) is pinned. With a pinned
/// system message the window therefore always retains at least one
/// conversational message; `max < 2` is rejected at config validation
/// and never reaches this function.
pub fn truncate(messages: &mut Vec<Message>, max: usize) {
    if messages.len() <= max {
        return;
    }

    let pinned = usize::from(
        messages
            .first()
            .is_some_and(|m| m.role == Role::System),
    );

    while messages.len() > max && messages.len() > pinned + 1 {
        messages.remove(pinned);
    }
}

/// The most recent user-authored text, if any.
pub fn last_user_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.text())
}
