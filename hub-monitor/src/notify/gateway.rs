//! Text message delivery through an HTTP messaging gateway.
//!
//! WhatsApp-style chat and SMS both go through the same shape of provider:
//! a JSON `POST {to, message}` with an optional bearer token. Non-2xx
//! responses count as failures and are retried with backoff.

use super::{deliver_with_retry, ChannelKind, MessageChannel, RETRY_DELAYS_MS};
use crate::config::GatewayConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    to: &'a str,
    message: &'a str,
}

pub struct HttpGatewayChannel {
    kind: ChannelKind,
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGatewayChannel {
    pub fn new(kind: ChannelKind, config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            kind,
            client,
            config,
        })
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, body: &GatewayMessage<'_>) -> Result<()> {
        let mut request = self.client.post(&self.config.url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::delivery(
                self.kind.as_str(),
                format!("gateway returned HTTP {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for HttpGatewayChannel {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
        if recipient.trim().is_empty() {
            return Err(Error::Validation("empty recipient".to_string()));
        }

        let body = GatewayMessage {
            to: recipient,
            message: text,
        };
        let body = &body;
        deliver_with_retry(self.kind, &RETRY_DELAYS_MS, || async move {
            self.try_send(body).await
        })
        .await?;

        info!(channel = %self.kind, to = recipient, "Alert message sent");
        Ok(())
    }
}
