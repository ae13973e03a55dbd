pub mod agent_loop;
pub mod config;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod mock;
pub mod model;
pub mod tool_registry;
pub mod types;

pub use agent_loop::AgentLoop;
pub use config::AppConfig;
pub use conversation::Conversation;
pub use error::AgentError;
pub use memory::ThreadStore;
pub use model::{ChatModel, OpenAiChatModel};
pub use tool_registry::ToolRegistry;
