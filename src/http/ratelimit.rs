//! In-memory token-bucket rate limiter: 60 requests/minute per client, burst-capable, with a
//! periodic background sweep evicting stale buckets — the same task family as the MCP reaper
//! ([`crate::mcp::supervisor::McpSupervisor`]'s periodic stale-request reap).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use log::warn;

use crate::error::ErrorEnvelope;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    /// 60 requests/minute, refilled continuously rather than in a once-a-minute reset, so a
    /// client that used its whole budget a second ago doesn't have to wait for a clock boundary.
    fn default() -> Self {
        RateLimitConfig { burst: 60, refill_per_sec: 1.0 }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(burst: u32) -> Self {
        Bucket { tokens: burst as f64, last_refill: Instant::now() }
    }

    fn try_consume(&mut self, burst: u32, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(burst as f64);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn retry_after(&self, refill_per_sec: f64) -> u64 {
        if refill_per_sec <= 0.0 {
            return 60;
        }
        ((1.0 - self.tokens) / refill_per_sec).ceil().max(1.0) as u64
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter { buckets: Arc::new(DashMap::new()), config }
    }

    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut entry = self.buckets.entry(ip).or_insert_with(|| Bucket::new(self.config.burst));
        if entry.try_consume(self.config.burst, self.config.refill_per_sec) {
            Ok(())
        } else {
            Err(entry.retry_after(self.config.refill_per_sec))
        }
    }

    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = Instant::now() - max_age;
        self.buckets.retain(|_, bucket| bucket.last_refill > cutoff);
    }

    /// Spawn the periodic sweep task. Returns the handle so callers can abort it on shutdown.
    pub fn spawn_sweeper(self, interval: Duration, max_age: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.cleanup(max_age);
            }
        })
    }
}

fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(ip) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }
    if let Some(ip) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()).and_then(|v| v.trim().parse::<IpAddr>().ok()) {
        return ip;
    }
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

pub async fn middleware(axum::extract::Extension(limiter): axum::extract::Extension<RateLimiter>, req: Request, next: Next) -> Response {
    let ip = extract_client_ip(&req);
    match limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!("rate limit exceeded for {ip}, retry after {retry_after}s");
            let envelope = ErrorEnvelope {
                code: "RATE_LIMITED".to_string(),
                message: "Rate limit reached. Please wait and try again.".to_string(),
                recoverable: Some(true),
                details: Some(serde_json::json!({ "retry_after": retry_after })),
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(envelope)).into_response();
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn allows_up_to_burst_then_denies() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 3, refill_per_sec: 0.0 });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_err());
    }

    #[test]
    fn different_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 1, refill_per_sec: 0.0 });
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_err());
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn cleanup_evicts_stale_buckets_only() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        limiter.check(ip).unwrap();
        limiter.cleanup(Duration::from_secs(0));
        assert!(limiter.buckets.is_empty());
    }
}
