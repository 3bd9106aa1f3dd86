//! Alert email delivery via SMTP.
//!
//! The transport is built once from [`SmtpConfig`] and reused for every
//! message. Only plain-text bodies are produced unless the payload asks for
//! HTML.

use super::{deliver_with_retry, ChannelKind, EmailChannel, EmailPayload, RETRY_DELAYS_MS};
use crate::config::SmtpConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub struct SmtpEmailChannel {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config.from_address.parse()?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }

    fn build_message(&self, email: &EmailPayload) -> Result<Message> {
        build_message(&self.from, email)
    }
}

fn build_message(from: &Mailbox, email: &EmailPayload) -> Result<Message> {
    if email.to.is_empty() {
        return Err(Error::Validation("email has no recipients".to_string()));
    }

    let mut builder = Message::builder().from(from.clone()).subject(&email.subject);
    for to in &email.to {
        builder = builder.to(to.parse()?);
    }

    let content_type = if email.html {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };

    builder
        .header(content_type)
        .body(email.body.clone())
        .map_err(|e| Error::Validation(format!("email build error: {}", e)))
}

#[async_trait]
impl EmailChannel for SmtpEmailChannel {
    async fn send_email(&self, email: &EmailPayload) -> Result<()> {
        // Malformed addresses will not improve with retries.
        let message = self.build_message(email)?;

        let transport = &self.transport;
        let message = &message;
        deliver_with_retry(ChannelKind::Email, &RETRY_DELAYS_MS, || async move {
            transport.send(message.clone()).await?;
            Ok(())
        })
        .await?;

        info!(to = ?email.to, subject = %email.subject, "Alert email sent");
        Ok(())
    }
}
