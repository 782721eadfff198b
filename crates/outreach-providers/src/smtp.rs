//! Direct SMTP adapter (lettre async transport, STARTTLS relay).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use outreach_core::config::ProviderConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::Provider;
use outreach_core::types::{OutboundMessage, SendResult};

pub struct SmtpProvider {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.smtp_host.is_empty() || config.smtp_user.is_empty() {
            return Err(OutreachError::Config(
                "smtp adapter selected but host/credentials not configured".into(),
            ));
        }

        let from: Mailbox = if config.from_name.is_empty() {
            config.from_email.parse()
        } else {
            format!("{} <{}>", config.from_name, config.from_email).parse()
        }
        .map_err(|e| OutreachError::Config(format!("invalid from address: {e}")))?;

        let creds = Credentials::new(config.smtp_user.clone(), config.smtp_pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| OutreachError::Config(format!("smtp relay: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl Provider for SmtpProvider {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        // A bad recipient address is a delivery failure, not an adapter error.
        let to: Mailbox = match message.to.parse() {
            Ok(m) => m,
            Err(e) => {
                return Ok(SendResult::failure(
                    self.name(),
                    format!("invalid recipient '{}': {e}", message.to),
                ))
            }
        };

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
            .map_err(|e| OutreachError::Provider(format!("build message: {e}")))?;

        match self.mailer.send(email).await {
            Ok(response) => Ok(SendResult::ok(
                self.name(),
                response.message().collect::<Vec<_>>().join(" "),
            )),
            Err(e) => Ok(SendResult::failure(self.name(), format!("smtp send: {e}"))),
        }
    }
}
