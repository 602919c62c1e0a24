//! `tracing` layer that mirrors relay logs into an operator Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 50;
const MAX_MESSAGE_CHARS: usize = 4000;

/// Events from these targets are never forwarded: sending a log produces
/// more of them.
const IGNORED_TARGETS: [&str; 4] = ["teloxide", "reqwest", "hyper", "h2"];

/// Log message with priority.
#[derive(Debug, PartialEq, Eq)]
enum LogMessage {
    /// WARN/ERROR, sent immediately
    Urgent(String),
    /// INFO, batched
    Info(String),
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Spawns the sender task; must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= MAX_BUFFERED {
                                    flush_buffer(&bot, chat_id, &mut info_buffer).await;
                                }
                            }
                            None => {
                                flush_buffer(&bot, chat_id, &mut info_buffer).await;
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => flush_buffer(&bot, chat_id, &mut info_buffer).await,
                }
            }
        });

        Self { tx }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = bot.send_message(chat_id, truncate(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush_buffer(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(bot, chat_id, &combined).await;
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{value:?}");
            if !fields.is_empty() {
                self.message.push_str(&format!(" ({fields})"));
            }
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn classify(level: Level, target: &str, message: String) -> Option<LogMessage> {
    if level > Level::INFO || IGNORED_TARGETS.iter().any(|t| target.starts_with(t)) {
        return None;
    }
    Some(match level {
        Level::ERROR => LogMessage::Urgent(format!("❌ {message}")),
        Level::WARN => LogMessage::Urgent(format!("⚠️ {message}")),
        _ => LogMessage::Info(message),
    })
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(msg) = classify(*metadata.level(), metadata.target(), visitor.message) else {
            return;
        };
        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
