//! Outbound delivery to push platforms.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::domain::OutboundMessage;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Endpoint configuration of one push platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderEndpoint {
    /// Name used in delivery logs. Falls back to the platform key when empty.
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Pause after each message, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    1000
}

impl SenderEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            url: url.into(),
            token: None,
            delay_ms: default_delay_ms(),
        }
    }

    pub fn display_name<'a>(&'a self, platform: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            platform
        } else {
            &self.name
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Thin network call that hands a message to a push platform.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Deliver `message` to `endpoint`. `Err` means the platform did not accept it.
    async fn send(&self, endpoint: &SenderEndpoint, message: &OutboundMessage) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

/// Posts messages as JSON to the endpoint URL.
pub struct HttpSender {
    client: Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }

    fn build_headers(endpoint: &SenderEndpoint) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = endpoint.token.as_deref().filter(|t| !t.trim().is_empty())
            && let Ok(value) = format!("Bearer {}", token).parse()
        {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn build_payload(message: &OutboundMessage) -> serde_json::Value {
        json!({
            "type": message.kind.code(),
            "num": message.target,
            "content": message.content,
            "timestamp": message.timestamp.timestamp_millis(),
        })
    }
}

#[async_trait]
impl OutboundSender for HttpSender {
    async fn send(&self, endpoint: &SenderEndpoint, message: &OutboundMessage) -> Result<()> {
        let response = self
            .client
            .post(&endpoint.url)
            .headers(Self::build_headers(endpoint))
            .json(&Self::build_payload(message))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, body = %body, "Push platform response");

        let parsed: PushResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Delivery(format!("{} - unexpected response: {}", status, e)))?;
        if parsed.code == 0 {
            Ok(())
        } else {
            Err(Error::Delivery(
                parsed.message.unwrap_or_else(|| format!("code {}", parsed.code)),
            ))
        }
    }
}
