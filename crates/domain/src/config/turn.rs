use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum messages retained per session, including the system
    /// message. Older non-system messages are evicted first.
    /// Must be at least 2; validated at startup.
    #[serde(default = "d_100")]
    pub max_history_messages: usize,
    /// Per-invocation tool timeout. A tool that exceeds this yields an
    /// error result; it does not abort the turn.
    #[serde(default = "d_30")]
    pub tool_timeout_secs: u64,
    /// Maximum tool invocations in flight at once within a single turn.
    #[serde(default = "d_4")]
    pub max_concurrent_tools: usize,
    /// System prompt seeded as the first message of every new session.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 100,
            tool_timeout_secs: 30,
            max_concurrent_tools: 4,
            system_prompt: d_system_prompt(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_100() -> usize {
    100
}
fn d_30() -> u64 {
    30
}
fn d_4() -> usize {
    4
}
fn d_system_prompt() -> String {
    "You are a product marketing strategist helping founders position \
     their products. On the first message of a conversation, ask one \
     clarifying question before reaching for tools or analysis. After \
     the user answers, use your tools to analyze their product and \
     assess positioning readiness."
        .into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_config_defaults() {
        let cfg: TurnConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_history_messages, 100);
        assert_eq!(cfg.tool_timeout_secs, 30);
        assert_eq!(cfg.max_concurrent_tools, 4);
        assert!(!cfg.system_prompt.is_empty());
    }

    #[test]
    fn turn_config_parses_overrides() {
        let toml_str = r#"
            max_history_messages = 20
            tool_timeout_secs = 5
            max_concurrent_tools = 2
        "#;
        let cfg: TurnConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_history_messages, 20);
        assert_eq!(cfg.tool_timeout_secs, 5);
        assert_eq!(cfg.max_concurrent_tools, 2);
    }
}
