pub mod clock;

use agent_core::tool_registry::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools into the registry.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(clock::ClockTool::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_installs_clock() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry);
        assert_eq!(registry.list_names(), vec![clock::TOOL_NAME]);
    }
}
