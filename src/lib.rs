//! Publish relay for rendered news graphics.
//!
//! Accepts images (as data URLs) or text over HTTP, queues them, and
//! delivers each job to a Telegram channel or a relay webhook, retrying
//! failures with exponential backoff.

pub mod auth;
pub mod config;
pub mod error;
pub mod job;
pub mod mock_telegram;
pub mod publisher;
pub mod queue;
pub mod ratelimit;
pub mod server;
pub mod telegram;
pub mod telegram_log;
pub mod webhook;

pub use config::Config;
pub use job::{PublishJob, PublishRequest};
pub use publisher::{Publisher, Relay};
pub use queue::{PublishQueue, RetryPolicy, spawn_worker};
pub use server::{ServerSettings, create_router};
