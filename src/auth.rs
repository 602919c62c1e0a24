//! Shared-secret authentication for the publish webhook.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::ApiError;

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Credentials a caller may present. Either one is enough.
#[derive(Debug, Clone, Default)]
pub struct WebhookAuth {
    pub secret: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    /// No credentials configured at all.
    Open,
    Denied,
}

impl WebhookAuth {
    pub fn check(&self, headers: &HeaderMap) -> AuthDecision {
        if self.secret.is_none() && self.api_key.is_none() {
            return AuthDecision::Open;
        }
        if matches_header(headers, SECRET_HEADER, self.secret.as_deref())
            || matches_header(headers, API_KEY_HEADER, self.api_key.as_deref())
        {
            return AuthDecision::Allowed;
        }
        AuthDecision::Denied
    }
}

fn matches_header(headers: &HeaderMap, name: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(name)
        .is_some_and(|v| constant_time_eq(v.as_bytes(), expected.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware rejecting requests without a valid secret or API key.
pub async fn require_webhook_auth(
    State(auth): State<Arc<WebhookAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match auth.check(request.headers()) {
        AuthDecision::Allowed => Ok(next.run(request).await),
        AuthDecision::Open => {
            warn!("No webhook auth configured - accepting request (dev)");
            Ok(next.run(request).await)
        }
        AuthDecision::Denied => Err(ApiError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_open_when_unconfigured() {
        assert_eq!(WebhookAuth::default().check(&HeaderMap::new()), AuthDecision::Open);
    }

    #[test]
    fn test_secret_header() {
        let auth = WebhookAuth { secret: Some("secret123".into()), api_key: None };
        assert_eq!(auth.check(&HeaderMap::new()), AuthDecision::Denied);
        assert_eq!(auth.check(&headers(&[(SECRET_HEADER, "secret12")])), AuthDecision::Denied);
        assert_eq!(auth.check(&headers(&[(SECRET_HEADER, "secret123")])), AuthDecision::Allowed);
        // An API key header does not satisfy a secret-only setup
        assert_eq!(auth.check(&headers(&[(API_KEY_HEADER, "secret123")])), AuthDecision::Denied);
    }

    #[test]
    fn test_either_credential() {
        let auth = WebhookAuth { secret: Some("s".into()), api_key: Some("k".into()) };
        assert_eq!(auth.check(&headers(&[(API_KEY_HEADER, "k")])), AuthDecision::Allowed);
        assert_eq!(auth.check(&headers(&[(SECRET_HEADER, "s")])), AuthDecision::Allowed);
        assert_eq!(auth.check(&headers(&[(SECRET_HEADER, "k")])), AuthDecision::Denied);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
