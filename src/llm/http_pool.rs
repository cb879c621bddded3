//! Shared, keyed pool of [`reqwest::Client`] instances.
//!
//! A process only ever talks to a handful of distinct base URLs, but each `reqwest::Client` owns
//! a connection pool worth keeping warm across requests, so one client per base URL is reused
//! rather than rebuilt per call.

use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;

static POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

/// Fetch or build the [`reqwest::Client`] for `base_url`.
pub fn client_for(base_url: &str) -> reqwest::Client {
    if let Some(existing) = POOL.get(base_url) {
        return existing.clone();
    }
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("reqwest client with only timeout configuration must build");
    POOL.insert(base_url.to_string(), client.clone());
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_base_url_reuses_the_same_pool_entry() {
        let url = "https://api.example-reuse.com";
        client_for(url);
        client_for(url);
        assert_eq!(POOL.iter().filter(|e| e.key() == url).count(), 1);
    }

    #[test]
    fn distinct_base_urls_get_distinct_entries() {
        client_for("https://a.example.com");
        client_for("https://b.example.com");
        assert!(POOL.len() >= 2);
    }
}
