//! Job and delivery data model.
//!
//! A `Job` is one promised send: recipient, opaque payload, a timestamp,
//! and a cadence describing whether it repeats. A `DeliveryAttempt` is one
//! append-only audit row per provider call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OutreachError, Result};

/// Execution state of a job. Closed set — an unrecognized status is a
/// deserialization failure, not a silently-ignored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "sent" => Ok(JobStatus::Sent),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(OutreachError::persistence(format!(
                "unknown job status '{other}' in store"
            ))),
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Sent | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }
}

/// Unit for a custom cadence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
}

/// Structured detail for `CadenceType::Custom` — "every n units".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomInterval {
    pub n: u32,
    pub unit: IntervalUnit,
}

/// How a job repeats after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceType {
    Single,
    Weekly,
    Biweekly,
    Monthly,
    EveryOtherMonth,
    Quarterly,
    Custom,
}

impl CadenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceType::Single => "single",
            CadenceType::Weekly => "weekly",
            CadenceType::Biweekly => "biweekly",
            CadenceType::Monthly => "monthly",
            CadenceType::EveryOtherMonth => "every_other_month",
            CadenceType::Quarterly => "quarterly",
            CadenceType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(CadenceType::Single),
            "weekly" => Ok(CadenceType::Weekly),
            "biweekly" => Ok(CadenceType::Biweekly),
            "monthly" => Ok(CadenceType::Monthly),
            "every_other_month" => Ok(CadenceType::EveryOtherMonth),
            "quarterly" => Ok(CadenceType::Quarterly),
            "custom" => Ok(CadenceType::Custom),
            other => Err(OutreachError::validation(format!(
                "unknown cadence type '{other}'"
            ))),
        }
    }
}

/// One scheduled, trackable promise to deliver one message at one time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job id (uuid v4).
    pub id: String,
    /// Campaign this job belongs to — opaque reference, not owned here.
    pub campaign_id: String,
    /// Subject entity (e.g. a client record) — opaque reference.
    pub client_id: Option<String>,
    /// Recipient address.
    pub recipient: String,
    /// Opaque payload; never parsed by the core.
    pub subject: String,
    pub body: String,
    /// Recurrence rule and its detail (only `custom` carries detail).
    pub cadence_type: CadenceType,
    pub cadence_data: Option<CustomInterval>,
    /// Index of this job within its campaign's occurrence sequence.
    pub occurrence: u32,
    /// Idempotency token; unique among active rows when present.
    pub dedupe_key: Option<String>,
    /// When to send (UTC).
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Attempts consumed so far; never exceeds `max_attempts`.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Claim marker — at most one live claim per job.
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Dedupe key for the follow-on occurrence of this job's campaign.
    pub fn next_dedupe_key(&self) -> String {
        format!("{}:{}", self.campaign_id, self.occurrence + 1)
    }
}

/// Append-only audit record: one row per provider call, created whether or
/// not the job row update afterwards succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub job_id: String,
    pub attempt_number: u32,
    /// "success" or "failure".
    pub status: String,
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// What a provider hands back after one send call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    /// Which adapter produced this result ("resend", "smtp", "mock").
    pub provider: String,
}

impl SendResult {
    pub fn ok(provider: &str, message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_message_id: Some(message_id.into()),
            error: None,
            provider: provider.to_string(),
        }
    }

    pub fn failure(provider: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
            provider: provider.to_string(),
        }
    }
}

/// The message a provider is asked to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Per-job result inside one dispatcher invocation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: String,
    /// "sent", "retry", "failed", "skipped", or "lock_conflict".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Next scheduled_at after a retry bump, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Follow-on job id when a recurrence was enqueued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_on: Option<String>,
}

/// JSON summary returned by one dispatcher invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub results: Vec<JobOutcome>,
}
