//! Error taxonomy for the dispatcher.
//!
//! Variants map the failure classes the system distinguishes at runtime:
//! validation is rejected synchronously at campaign creation, provider
//! failures stay contained to one job, persistence failures abort the
//! whole invocation.

use thiserror::Error;

/// Result type used across the workspace.
pub type Result<T> = std::result::Result<T, OutreachError>;

/// Top-level error for all Outreach crates.
#[derive(Debug, Error)]
pub enum OutreachError {
    /// Malformed cadence or missing required campaign fields.
    /// Rejected at creation time; never enters the job store.
    #[error("validation error: {0}")]
    Validation(String),

    /// The durable store is unreachable or a write failed.
    /// Fatal for the current dispatcher invocation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Provider misconfiguration or programmer error. Ordinary delivery
    /// failures are *not* errors — they come back as `SendResult`.
    #[error("provider error: {0}")]
    Provider(String),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Gateway-level failure (bind, serve).
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutreachError {
    /// Shorthand for validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for persistence failures.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}
