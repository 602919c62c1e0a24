//! HTTP router and handlers.

use std::any::Any;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{WebhookAuth, require_webhook_auth};
use crate::config::Config;
use crate::error::ApiError;
use crate::job::{PublishJob, PublishRequest};
use crate::queue::{JobSnapshot, PublishQueue};
use crate::ratelimit::{RateLimiter, rate_limit_by_ip};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<PublishQueue>,
}

/// HTTP-facing settings, split out of [`Config`] so tests can build a router directly.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub auth: WebhookAuth,
    pub rate_limit_per_minute: u32,
    pub trust_proxy: bool,
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            auth: WebhookAuth::default(),
            rate_limit_per_minute: 30,
            trust_proxy: false,
            body_limit_bytes: 12 * 1024 * 1024,
        }
    }
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auth: WebhookAuth {
                secret: config.webhook_secret.clone(),
                api_key: config.webhook_api_key.clone(),
            },
            rate_limit_per_minute: config.rate_limit_per_minute,
            trust_proxy: config.trust_proxy,
            body_limit_bytes: config.body_limit_bytes,
        }
    }
}

/// Create the application router.
pub fn create_router(queue: Arc<PublishQueue>, settings: ServerSettings) -> Router {
    let auth = Arc::new(settings.auth);
    let limiter = Arc::new(RateLimiter::per_minute(
        settings.rate_limit_per_minute,
        settings.trust_proxy,
    ));

    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods(cors::Any)
        .allow_headers(cors::Any);

    // Rate limit runs before auth so unauthenticated floods are throttled too
    let publish_routes = Router::new()
        .route("/publish", post(publish))
        .route_layer(from_fn_with_state(auth.clone(), require_webhook_auth))
        .route_layer(from_fn_with_state(limiter, rate_limit_by_ip));

    let job_routes = Router::new()
        .route("/jobs/{id}", get(get_job))
        .route_layer(from_fn_with_state(auth, require_webhook_auth));

    Router::new()
        .route("/health", get(health))
        .merge(publish_routes)
        .merge(job_routes)
        .layer(DefaultBodyLimit::max(settings.body_limit_bytes))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(AppState { queue })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub success: bool,
    pub queued: bool,
    pub job_id: String,
}

async fn publish(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let Json(request) = body?;
    let job = PublishJob::from_request(request).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let job_id = state.queue.enqueue(job).await;

    Ok(Json(PublishResponse { success: true, queued: true, job_id: job_id.to_string() }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id: u64 = id.parse().map_err(|_| ApiError::NotFound("Job"))?;
    state.queue.get(id).await.map(Json).ok_or(ApiError::NotFound("Job"))
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    queued: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { ok: true, queued: state.queue.len().await })
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(detail).into_response()
}
