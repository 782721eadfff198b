//! Provider trait — the seam between the dispatcher and delivery transports.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{OutboundMessage, SendResult};

/// Uniform interface over outbound-message transports.
///
/// Ordinary delivery failures (rejected address, provider outage, non-2xx
/// API response) come back as `Ok(SendResult { success: false, .. })`.
/// `Err(..)` is reserved for programmer errors — missing configuration and
/// the like — which the dispatcher treats as fatal for the invocation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short adapter name recorded in the audit log ("resend", "smtp", "mock").
    fn name(&self) -> &str;

    /// Attempt one delivery.
    async fn send(&self, message: &OutboundMessage) -> Result<SendResult>;
}
