//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;

use pmm_domain::config::{Config, ConfigSeverity};
use pmm_engine::sessions::SessionRegistry;
use pmm_engine::tools::ToolRegistry;
use pmm_engine::turn::TurnOrchestrator;
use pmm_providers::{AnthropicEngine, CompletionEngine};

use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Completion engine ────────────────────────────────────────────
    let engine = AnthropicEngine::from_config(&config.llm)
        .context("initializing the Anthropic completion engine")?;
    tracing::info!(engine = engine.engine_id(), model = %config.llm.model, "engine ready");

    // ── Tools ────────────────────────────────────────────────────────
    let mut registry = ToolRegistry::new();
    pmm_tools::register_builtins(&mut registry);
    tracing::info!(tool_count = registry.len(), "tool registry ready");

    // ── Sessions and orchestrator ────────────────────────────────────
    let sessions = Arc::new(SessionRegistry::new(config.turn.system_prompt.clone()));
    let orchestrator = Arc::new(TurnOrchestrator::new(
        Arc::new(engine),
        Arc::new(registry),
        sessions,
        &config.turn,
    ));

    Ok(AppState {
        config,
        orchestrator,
    })
}
