use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Env var containing the API key. Resolved once at startup;
    /// a missing key aborts startup rather than failing mid-turn.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_8192")]
    pub max_tokens: u32,
    #[serde(default = "d_120")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            model: d_model(),
            api_key_env: d_api_key_env(),
            max_tokens: 8192,
            request_timeout_secs: 120,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn d_8192() -> u32 {
    8192
}
fn d_120() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
