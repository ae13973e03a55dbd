use agent_core::agent_loop::AgentLoop;
use agent_core::config::AppConfig;
use agent_core::memory::ThreadStore;
use agent_core::tool_registry::ToolRegistry;
use std::sync::Arc;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub agent_loop: Arc<AgentLoop>,
    pub threads: Arc<ThreadStore>,
}

impl AppState {
    pub fn new(config: AppConfig, agent_loop: Arc<AgentLoop>, threads: Arc<ThreadStore>) -> Self {
        Self {
            config,
            agent_loop,
            threads,
        }
    }

    /// State backed by the OpenAI-compatible provider in `config`.
    pub fn from_config(config: AppConfig, tool_registry: Arc<ToolRegistry>) -> Self {
        let agent_loop = AgentLoop::from_config(&config, tool_registry);
        let threads = ThreadStore::new(config.memory.clone());
        Self::new(config, Arc::new(agent_loop), Arc::new(threads))
    }
}
