//! Best-effort web search used to enrich the board's context before advisors are consulted.
//!
//! No search API key is required, so the default client hits DuckDuckGo's keyless HTML endpoint
//! and scrapes result titles/snippets/URLs with a couple of small regexes rather than pulling in
//! a full HTML parser for five fields.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TheresError;

#[derive(Debug, Clone)]
pub struct WebSearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait WebSearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>, TheresError>;
}

pub struct DuckDuckGoSearch;

static RESULT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]+class="result__a"[^>]+href="([^"]+)"[^>]*>(.*?)</a>.*?class="result__snippet"[^>]*>(.*?)</a>"#).unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

fn strip_tags(fragment: &str) -> String {
    let no_tags = TAG.replace_all(fragment, "");
    decode_basic_entities(&no_tags).trim().to_string()
}

/// Decode the handful of HTML entities DuckDuckGo's result markup actually emits. Not a general
/// HTML-entity decoder — a full one isn't worth a dependency for five known entities.
fn decode_basic_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[async_trait]
impl WebSearchClient for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>, TheresError> {
        let client = crate::llm::http_pool::client_for("https://html.duckduckgo.com");
        let url = format!("https://html.duckduckgo.com/html/?q={}", urlencoding::encode(query));
        let response = client
            .get(&url)
            .header("User-Agent", "Mozilla/5.0 (compatible; therese/1.0)")
            .send()
            .await
            .map_err(|e| TheresError::ApiUnreachable { provider: "web_search".to_string(), detail: e.to_string() })?;
        let body = response
            .text()
            .await
            .map_err(|e| TheresError::ApiUnreachable { provider: "web_search".to_string(), detail: e.to_string() })?;

        let results = RESULT_BLOCK
            .captures_iter(&body)
            .take(max_results)
            .filter_map(|caps| {
                let url = caps.get(1)?.as_str().to_string();
                let title = strip_tags(caps.get(2)?.as_str());
                let snippet = strip_tags(caps.get(3)?.as_str());
                if title.is_empty() {
                    return None;
                }
                Some(WebSearchResult { title, snippet, url })
            })
            .collect();
        Ok(results)
    }
}

/// Always returns no results. Used when no network search is desired (tests, offline mode).
pub struct NullWebSearch;

#[async_trait]
impl WebSearchClient for NullWebSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSearchResult>, TheresError> {
        Ok(Vec::new())
    }
}

/// Render results the way the board injects them into the advisors' shared context: one
/// `"**{n}. {title}**\n{snippet}\nSource: {url}\n\n"` block per result, in ranked order.
pub fn format_results(results: &[WebSearchResult]) -> String {
    let mut text = String::new();
    for (i, result) in results.iter().enumerate() {
        text.push_str(&format!("**{}. {}**\n{}\nSource: {}\n\n", i + 1, result.title, result.snippet, result.url));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_results_numbers_entries_in_ranked_order() {
        let results = vec![
            WebSearchResult { title: "First".into(), snippet: "a".into(), url: "https://a".into() },
            WebSearchResult { title: "Second".into(), snippet: "b".into(), url: "https://b".into() },
        ];
        let text = format_results(&results);
        assert!(text.starts_with("**1. First**"));
        assert!(text.contains("**2. Second**"));
        assert!(text.contains("Source: https://a"));
    }

    #[tokio::test]
    async fn null_client_always_returns_empty() {
        let results = NullWebSearch.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn strip_tags_decodes_entities_and_removes_markup() {
        assert_eq!(strip_tags("<b>Bread</b> &amp; butter"), "Bread & butter");
    }
}
