//! Therese: a local-first personal assistant backend.
//!
//! This crate is the concurrency and protocol engine: a multi-provider LLM streaming facade, an
//! MCP subprocess supervisor, a parallel advisor board, and the security envelope (encryption,
//! session tokens, prompt-injection screening, path sandboxing) underlying all of it. Thin CRUD
//! surfaces, the vector store, and the desktop shell are out of scope — this crate exposes the
//! HTTP/SSE API that a UI or automation client drives.

pub mod board;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod security;
pub mod store;
