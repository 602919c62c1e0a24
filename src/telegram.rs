//! Telegram delivery using teloxide.

use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Recipient};
use tracing::{info, warn};

use crate::job::{ChatTarget, PublishJob};
use crate::publisher::{Delivery, DeliveryError, Publisher};

/// Build a bot, pointing it at a non-default Bot API server if one is given.
pub fn build_bot(token: &str, api_url: Option<&reqwest::Url>) -> Bot {
    let bot = Bot::new(token);
    match api_url {
        Some(url) => bot.set_api_url(url.clone()),
        None => bot,
    }
}

/// Posts jobs to a Telegram chat or channel.
pub struct TelegramPublisher {
    bot: Bot,
    default_chat: ChatTarget,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, default_chat: ChatTarget) -> Self {
        Self { bot, default_chat }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn default_chat(&self) -> &ChatTarget {
        &self.default_chat
    }

    /// Send a photo from bytes.
    async fn send_photo(
        &self,
        chat: &ChatTarget,
        bytes: Vec<u8>,
        file_name: &'static str,
        caption: &str,
    ) -> Result<i64, DeliveryError> {
        info!("📷 Sending photo to {} ({} bytes)", chat, bytes.len());

        let input_file = InputFile::memory(bytes).file_name(file_name);
        let mut request = self.bot.send_photo(recipient(chat), input_file);

        if !caption.is_empty() {
            request = request.caption(caption);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            warn!("Failed to send photo: {e}");
            map_error(e)
        })
    }

    async fn send_text(&self, chat: &ChatTarget, text: &str) -> Result<i64, DeliveryError> {
        info!("📰 Sending text to {} ({} chars)", chat, text.chars().count());

        self.bot.send_message(recipient(chat), text).await.map(|msg| msg.id.0 as i64).map_err(|e| {
            warn!("Failed to send message: {e}");
            map_error(e)
        })
    }
}

impl Publisher for TelegramPublisher {
    async fn publish(&self, job: &PublishJob) -> Result<Delivery, DeliveryError> {
        let chat = job.chat_id.as_ref().unwrap_or(&self.default_chat);

        let message_id = match &job.image {
            Some(image) => {
                self.send_photo(chat, image.bytes.clone(), image.file_name(), &job.caption)
                    .await?
            }
            None => {
                let text = job.message_text();
                if text.is_empty() {
                    return Err(DeliveryError::Config("job has neither image nor text".into()));
                }
                self.send_text(chat, text).await?
            }
        };

        Ok(Delivery { message_id: Some(message_id) })
    }
}

fn recipient(target: &ChatTarget) -> Recipient {
    match target {
        ChatTarget::Id(id) => Recipient::Id(ChatId(*id)),
        ChatTarget::Username(name) => Recipient::ChannelUsername(name.clone()),
    }
}

fn map_error(err: RequestError) -> DeliveryError {
    match err {
        RequestError::RetryAfter(secs) => DeliveryError::RetryAfter(secs.duration()),
        RequestError::Network(e) => DeliveryError::Http(e.to_string()),
        other => DeliveryError::Telegram(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::Seconds;

    #[test]
    fn test_recipient_from_target() {
        assert_eq!(recipient(&ChatTarget::Id(-10042)), Recipient::Id(ChatId(-10042)));
        assert_eq!(
            recipient(&ChatTarget::Username("@news".into())),
            Recipient::ChannelUsername("@news".into())
        );
    }

    #[test]
    fn test_flood_control_maps_to_retry_after() {
        let err = map_error(RequestError::RetryAfter(Seconds::from_seconds(5)));
        assert_eq!(err, DeliveryError::RetryAfter(std::time::Duration::from_secs(5)));
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(5)));
    }

    #[test]
    fn test_build_bot_with_custom_api_url() {
        let url = reqwest::Url::parse("http://127.0.0.1:9090").unwrap();
        let bot = build_bot("123456789:ABCdef", Some(&url));
        assert_eq!(bot.api_url().as_str(), "http://127.0.0.1:9090/");
    }
}
