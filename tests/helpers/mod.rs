//! Shared helpers for HTTP integration tests.
//!
//! `TestApp` drives the full router through `tower::ServiceExt::oneshot`.
//! Requests carry no connect info, and so share one rate limit key, unless
//! the app was derived with [`TestApp::via_peer`].
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use newsrelay::{PublishQueue, RetryPolicy, ServerSettings, create_router};
use serde_json::Value;
use tower::ServiceExt;

/// A 1x1 transparent PNG.
pub const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVQYV2NgYAAAAAMAAWgmWQ0AAAAASUVORK5CYII=";

pub struct TestApp {
    pub router: Router,
    pub queue: Arc<PublishQueue>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_policy(settings, fast_policy())
    }

    pub fn with_policy(settings: ServerSettings, policy: RetryPolicy) -> Self {
        let queue = Arc::new(PublishQueue::new(policy));
        let router = create_router(queue.clone(), settings);
        Self { router, queue }
    }

    /// Same router and queue, with every request arriving from `peer`.
    pub fn via_peer(&self, peer: SocketAddr) -> TestApp {
        TestApp {
            router: self.router.clone().layer(axum::Extension(ConnectInfo(peer))),
            queue: self.queue.clone(),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, headers, body }
    }

    pub async fn publish(&self, body: Value) -> TestResponse {
        self.publish_with(body, &[]).await
    }

    pub async fn publish_with(&self, body: Value, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/publish")
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

/// Millisecond backoff so delivery tests finish quickly in real time.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(200),
    }
}

/// Poll until the queue is empty, failing after `timeout`.
pub async fn wait_for_drain(queue: &PublishQueue, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !queue.is_empty().await {
        assert!(tokio::time::Instant::now() < deadline, "queue did not drain within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
