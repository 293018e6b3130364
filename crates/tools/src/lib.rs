//! Built-in product marketing tools.
//!
//! Deterministic analysis tools the agent can invoke during a turn.
//! Registered once at startup via [`register_builtins`].

mod intake;
mod scoring;

pub use intake::AnalyzeProduct;
pub use scoring::PositioningReadiness;

use std::sync::Arc;

use pmm_engine::tools::ToolRegistry;

/// Register every built-in tool on the given registry.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(Arc::new(AnalyzeProduct));
    registry.register(Arc::new(PositioningReadiness));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);
        assert!(registry.get("analyze_product").is_some());
        assert!(registry.get("calculate_positioning_readiness").is_some());
        assert_eq!(registry.len(), 2);
    }
}
