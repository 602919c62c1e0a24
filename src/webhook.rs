//! Relay webhook delivery (Zapier, Make and similar automation hooks).

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::job::PublishJob;
use crate::publisher::{Delivery, DeliveryError, Publisher};

const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RelayPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    caption: &'a str,
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    chat_id: Option<String>,
    timestamp: String,
}

/// Forwards jobs as JSON to a fixed URL.
pub struct WebhookPublisher {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(url: reqwest::Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

impl Publisher for WebhookPublisher {
    async fn publish(&self, job: &PublishJob) -> Result<Delivery, DeliveryError> {
        let payload = RelayPayload {
            image: job.image.as_ref().map(|i| i.to_data_url()),
            text: job.text.as_deref(),
            caption: &job.caption,
            chat_id: job.chat_id.as_ref().map(|c| c.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        info!("🔗 Relaying {} job to {}", job.kind(), self.url);

        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.to_string()))?;

        let status = response.status();
        debug!("Relay response status: {status}");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api { status: status.as_u16(), body });
        }

        Ok(Delivery { message_id: None })
    }
}
