//! Delivery targets for publish jobs.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use teloxide::Bot;

use crate::job::PublishJob;
use crate::telegram::TelegramPublisher;
use crate::webhook::WebhookPublisher;

/// Result of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Telegram message id, when the target reports one.
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Telegram rejected the request.
    Telegram(String),
    /// Telegram flood control; do not retry sooner than this.
    RetryAfter(Duration),
    /// Transport failure (connect, timeout, TLS).
    Http(String),
    /// Relay answered with a non-success status.
    Api { status: u16, body: String },
    /// Job cannot be delivered with the current configuration.
    Config(String),
    /// The attempt panicked or was cancelled before it produced a result.
    Aborted(String),
}

impl DeliveryError {
    /// Lower bound on the delay before the next attempt, if the target asked for one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RetryAfter(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram(e) => write!(f, "Telegram API error: {e}"),
            Self::RetryAfter(d) => write!(f, "Telegram flood control, retry after {}s", d.as_secs()),
            Self::Http(e) => write!(f, "HTTP error: {e}"),
            Self::Api { status, body } => write!(f, "relay error {status}: {body}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Aborted(e) => write!(f, "delivery attempt aborted: {e}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sends one job to its destination. One call is one attempt.
pub trait Publisher: Send + Sync {
    fn publish(&self, job: &PublishJob) -> impl Future<Output = Result<Delivery, DeliveryError>> + Send;
}

/// The configured delivery target.
pub enum Relay {
    Telegram(TelegramPublisher),
    Webhook(WebhookPublisher),
}

impl Relay {
    /// The bot behind a Telegram target.
    pub fn bot(&self) -> Option<&Bot> {
        match self {
            Self::Telegram(t) => Some(t.bot()),
            Self::Webhook(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Telegram(t) => format!("Telegram (default chat {})", t.default_chat()),
            Self::Webhook(w) => format!("webhook {}", w.url()),
        }
    }
}

impl Publisher for Relay {
    async fn publish(&self, job: &PublishJob) -> Result<Delivery, DeliveryError> {
        match self {
            Self::Telegram(t) => t.publish(job).await,
            Self::Webhook(w) => w.publish(job).await,
        }
    }
}
