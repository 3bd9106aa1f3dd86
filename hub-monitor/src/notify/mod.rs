//! Notification channels and the router that fans alerts out to them.
//!
//! Channel adapters are capability handles built once at startup. Each one
//! owns its retry/backoff; callers only see the final outcome.

pub mod email;
pub mod gateway;
pub mod router;

pub use email::SmtpEmailChannel;
pub use gateway::HttpGatewayChannel;
pub use router::{Channels, DeliveryStatus, DispatchReport, NotificationRouter, SkipReason};

use crate::errors::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    WhatsApp,
    Sms,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailPayload {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Text messaging transport (WhatsApp-style chat or SMS).
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()>;
}

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send_email(&self, email: &EmailPayload) -> Result<()>;
}

/// Retry delays between attempts (exponential backoff).
const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Run `attempt` until it succeeds, sleeping between failures. The last
/// error is returned as a `Delivery` error for `channel`.
pub(crate) async fn deliver_with_retry<F, Fut>(
    channel: ChannelKind,
    delays: &[u64],
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => match delays.get(tries - 1) {
                Some(&delay_ms) => {
                    warn!(
                        channel = %channel,
                        attempt = tries,
                        error = %e,
                        "Delivery attempt failed, retrying in {}ms",
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                None => {
                    return Err(match e {
                        Error::Delivery { .. } => e,
                        other => Error::delivery(channel.as_str(), other),
                    })
                }
            },
        }
    }
}
