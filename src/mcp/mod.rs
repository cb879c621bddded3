//! MCP (Model Context Protocol) subprocess supervisor: sandboxing, process lifecycle, and
//! JSON-RPC-over-stdio multiplexing for external tool servers.

pub mod config;
pub mod env;
pub mod process;
pub mod rpc;
pub mod sandbox;
pub mod supervisor;

pub use supervisor::{McpSupervisor, MCPTool, ServerStatus, ServerView, ToolCallResult};
