//! Resend transactional email adapter.
//!
//! POSTs to the Resend REST API with a bearer key. A non-2xx response is a
//! delivery failure (reported in the `SendResult`), not an adapter error.

use async_trait::async_trait;
use serde::Deserialize;

use outreach_core::config::ProviderConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::Provider;
use outreach_core::types::{OutboundMessage, SendResult};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

pub struct ResendProvider {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct ResendAccepted {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendRejected {
    message: Option<String>,
}

impl ResendProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.resend_api_key.is_empty() {
            return Err(OutreachError::Config(
                "resend adapter selected but no API key configured".into(),
            ));
        }
        let from = if config.from_name.is_empty() {
            config.from_email.clone()
        } else {
            format!("{} <{}>", config.from_name, config.from_email)
        };
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.resend_api_key.clone(),
            from,
        })
    }
}

#[async_trait]
impl Provider for ResendProvider {
    fn name(&self) -> &str {
        "resend"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendResult> {
        let resp = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.body,
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            // Transport-level failure: retryable delivery failure.
            Err(e) => return Ok(SendResult::failure(self.name(), format!("request: {e}"))),
        };

        let status = resp.status();
        if status.is_success() {
            match resp.json::<ResendAccepted>().await {
                Ok(accepted) => Ok(SendResult::ok(self.name(), accepted.id)),
                Err(e) => Ok(SendResult::failure(
                    self.name(),
                    format!("malformed accept response: {e}"),
                )),
            }
        } else {
            let detail = resp
                .json::<ResendRejected>()
                .await
                .ok()
                .and_then(|r| r.message)
                .unwrap_or_else(|| "no error detail".into());
            Ok(SendResult::failure(
                self.name(),
                format!("resend API {status}: {detail}"),
            ))
        }
    }
}
