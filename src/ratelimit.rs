//! Per-IP fixed-window rate limiting for the publish endpoint.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Windows are pruned once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window resets.
    pub reset_after: u64,
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    trust_proxy: bool,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, trust_proxy: bool) -> Self {
        Self { limit, window, trust_proxy, windows: Mutex::new(HashMap::new()) }
    }

    pub fn per_minute(limit: u32, trust_proxy: bool) -> Self {
        Self::new(limit, Duration::from_secs(60), trust_proxy)
    }

    /// Count one request from `key` and report whether it may proceed.
    pub async fn check(&self, key: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows
            .entry(key.to_string())
            .or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(entry.started))
            .as_secs()
            .max(1);

        if entry.count >= self.limit {
            return RateLimitResult { allowed: false, limit: self.limit, remaining: 0, reset_after };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_after,
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Client key: the first `X-Forwarded-For` hop behind a trusted proxy, else the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug)]
pub enum RateLimitError {
    LimitExceeded(RateLimitResult),
}

#[derive(Serialize)]
struct RateLimitErrorResponse {
    error: &'static str,
    message: String,
    retry_after: u64,
}

fn insert_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(result.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(result.reset_after));
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        match self {
            Self::LimitExceeded(result) => {
                let body = RateLimitErrorResponse {
                    error: "rate_limited",
                    message: format!("Too many requests. Wait {} seconds.", result.reset_after),
                    retry_after: result.reset_after,
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert("retry-after", HeaderValue::from(result.reset_after));
                insert_headers(headers, &result);
                response
            }
        }
    }
}

/// Middleware enforcing the per-IP limit.
///
/// The peer address comes from the `ConnectInfo` extension, which is only
/// present when the server is started with connect info.
pub async fn rate_limit_by_ip(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let key = client_key(request.headers(), peer, limiter.trust_proxy);
    let result = limiter.check(&key).await;

    if !result.allowed {
        debug!(ip = %key, retry_after = result.reset_after, "Rate limit exceeded");
        return Err(RateLimitError::LimitExceeded(result));
    }

    let mut response = next.run(request).await;
    insert_headers(response.headers_mut(), &result);
    Ok(response)
}
