//! Multi-provider LLM streaming engine.

pub mod context;
pub mod facade;
pub mod http_pool;
pub mod message;
pub mod provider_config;
pub mod providers;

pub use context::ContextWindow;
pub use facade::LLMFacade;
pub use message::{Message, Role, StreamEvent, ToolCall, ToolDefinition, ToolResult};
pub use provider_config::{LLMConfig, Provider};
