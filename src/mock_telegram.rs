//! A stand-in for the Telegram Bot API, for local runs and end-to-end tests.
//!
//! Answers every `POST /bot<token>/<method>` with a minimal successful
//! result and records what it received. It can be told to fail the next
//! few calls, or to answer one call with flood control, to exercise the
//! retry path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// One request the mock received.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub token: String,
    /// Lowercased method name, e.g. `sendphoto`.
    pub method: String,
    /// Raw request body, lossily decoded (multipart or JSON).
    pub body: String,
    pub received_at: Instant,
}

#[derive(Default)]
pub struct MockTelegram {
    calls: Mutex<Vec<MockCall>>,
    fail_next: AtomicU32,
    flood_secs: AtomicU32,
    next_message_id: AtomicI64,
}

impl MockTelegram {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_message_id: AtomicI64::new(1), ..Default::default() })
    }

    /// Answer the next `n` calls with a 400 error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Answer the next call with a 429 asking the client to wait `secs`.
    pub fn flood_next(&self, secs: u32) {
        self.flood_secs.store(secs, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/{bot}/{method}", post(handle)).with_state(self)
    }

    /// Bind `addr` and serve in the background.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let app = self.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Mock Telegram server stopped: {e}");
            }
        });
        Ok((local, handle))
    }
}

async fn handle(
    State(mock): State<Arc<MockTelegram>>,
    Path((bot, method)): Path<(String, String)>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let token = bot.strip_prefix("bot").unwrap_or(&bot).to_string();
    let method = method.to_ascii_lowercase();
    info!("Mock Telegram received {} ({} bytes)", method, body.len());

    mock.calls.lock().await.push(MockCall {
        token,
        method: method.clone(),
        body: String::from_utf8_lossy(&body).into_owned(),
        received_at: Instant::now(),
    });

    let flood = mock.flood_secs.swap(0, Ordering::SeqCst);
    if flood > 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "ok": false,
                "error_code": 429,
                "description": format!("Too Many Requests: retry after {flood}"),
                "parameters": { "retry_after": flood }
            })),
        );
    }

    let failing = mock
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: mock failure" })),
        );
    }

    let result = if method == "getme" {
        json!({
            "id": 1,
            "is_bot": true,
            "first_name": "Mock",
            "username": "mock_relay_bot",
            "can_join_groups": true,
            "can_read_all_group_messages": false,
            "supports_inline_queries": false,
            "can_connect_to_business": false,
            "has_main_web_app": false
        })
    } else {
        let message_id = mock.next_message_id.fetch_add(1, Ordering::SeqCst);
        json!({
            "message_id": message_id,
            "date": 1_700_000_000,
            "chat": { "id": 1, "type": "private", "first_name": "Mock" },
            "from": { "id": 1, "is_bot": true, "first_name": "Mock" },
            "text": "ok"
        })
    };

    (StatusCode::OK, Json(json!({ "ok": true, "result": result })))
}
