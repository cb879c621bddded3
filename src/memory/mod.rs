//! Semantic memory retrieval: an external contract only.
//!
//! No vector-database client lives anywhere in the retrieval pack this crate was grounded on, so
//! rather than fabricate a dependency on one, this module defines the contract
//! ([`MemoryStore`]) the context-assembly layer calls through and ships a [`NullMemoryStore`]
//! that always returns no matches — the same trait-object-with-null-impl shape used for
//! [`crate::board::web_search::WebSearchClient`]. A real implementation (e.g. backed by Qdrant,
//! per [`crate::config::Config::vector_store_dir`]'s naming) can be dropped in behind this trait
//! without the rest of the crate changing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TheresError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    Episode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryScope {
    Global,
    Project { scope_id: String },
    Conversation { scope_id: String },
    Contact { scope_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub similarity: f32,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn search(
        &self,
        query: &str,
        memory_types: Option<&[MemoryType]>,
        similarity_floor: f32,
        scope: &MemoryScope,
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, TheresError>;
}

/// Always returns no matches. The default until a real vector-store-backed implementation exists.
pub struct NullMemoryStore;

#[async_trait]
impl MemoryStore for NullMemoryStore {
    async fn search(
        &self,
        _query: &str,
        _memory_types: Option<&[MemoryType]>,
        _similarity_floor: f32,
        _scope: &MemoryScope,
        _top_k: usize,
    ) -> Result<Vec<MemoryMatch>, TheresError> {
        Ok(Vec::new())
    }
}

/// Render matches as the `## Contexte mémoire:` block inserted into the system prompt when the
/// caller asked for memory inclusion.
pub fn format_memory_section(matches: &[MemoryMatch]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let mut text = String::from("## Contexte mémoire:\n");
    for m in matches {
        text.push_str(&format!("- {}\n", m.content));
    }
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_always_returns_empty() {
        let store = NullMemoryStore;
        let matches = store
            .search("anything", None, 0.5, &MemoryScope::Global, 5)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn format_memory_section_is_none_when_empty() {
        assert!(format_memory_section(&[]).is_none());
    }

    #[test]
    fn format_memory_section_renders_bullet_list() {
        let matches = vec![MemoryMatch {
            id: "1".into(),
            memory_type: MemoryType::Fact,
            content: "prefers concise replies".into(),
            similarity: 0.9,
        }];
        let section = format_memory_section(&matches).unwrap();
        assert!(section.starts_with("## Contexte mémoire:\n"));
        assert!(section.contains("prefers concise replies"));
    }
}
