//! # Outreach Providers
//!
//! Delivery adapters behind the uniform [`Provider`] trait: the Resend
//! transactional API, a direct SMTP transport, and a deterministic mock for
//! tests. Selection is a static precedence decided once per process —
//! a configured real provider always wins, and falling back to the mock in
//! a non-test environment is loudly flagged, never silent.

pub mod mock;
pub mod resend;
pub mod smtp;

use std::sync::Arc;

use outreach_core::config::OutreachConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::Provider;

pub use mock::MockProvider;
pub use resend::ResendProvider;
pub use smtp::SmtpProvider;

/// Choose the delivery adapter for this process.
///
/// Precedence: explicit `provider.adapter` override, then Resend when its
/// API key is present, then SMTP when host + credentials are present, then
/// the mock — with a warning, because mail "sent" through the mock goes
/// nowhere.
pub fn select_provider(config: &OutreachConfig) -> Result<Arc<dyn Provider>> {
    let p = &config.provider;
    match p.adapter.as_str() {
        "resend" => Ok(Arc::new(ResendProvider::new(p)?)),
        "smtp" => Ok(Arc::new(SmtpProvider::new(p)?)),
        "mock" => Ok(Arc::new(MockProvider::new())),
        "" => {
            if !p.resend_api_key.is_empty() {
                tracing::info!("📧 Delivery provider: resend");
                return Ok(Arc::new(ResendProvider::new(p)?));
            }
            if !p.smtp_host.is_empty() && !p.smtp_user.is_empty() {
                tracing::info!("📧 Delivery provider: smtp ({})", p.smtp_host);
                return Ok(Arc::new(SmtpProvider::new(p)?));
            }
            tracing::warn!(
                "⚠️ No delivery provider configured — using the mock adapter. \
                 Outbound mail will NOT be delivered."
            );
            Ok(Arc::new(MockProvider::new()))
        }
        other => Err(OutreachError::Config(format!(
            "unknown provider adapter '{other}' (expected resend, smtp, or mock)"
        ))),
    }
}
