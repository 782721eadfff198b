//! # Outreach Dispatch
//!
//! The dispatcher loop: one invocation reclaims stale locks, fetches a
//! bounded batch of due jobs, and processes them on a small worker pool.
//! Every job is claimed through the store's conditional update first, so
//! overlapping invocations (cron firing while the previous run is still
//! going) each deliver a disjoint set of jobs.
//!
//! One job's failure never takes down the batch: delivery failures become
//! retry bookkeeping, a panicking send task is caught at the join point and
//! recorded as a failed attempt for that job alone. Only adapter
//! configuration errors and store errors abort an invocation.

pub mod campaign;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use outreach_core::config::DispatcherConfig;
use outreach_core::error::Result;
use outreach_core::traits::Provider;
use outreach_core::types::{
    CadenceType, DispatchSummary, Job, JobOutcome, OutboundMessage, SendResult,
};
use outreach_store::{AttemptRecord, JobStore, NewJob, RetryDecision};

pub use campaign::{schedule_campaign, CampaignRequest, ScheduledCampaign};

/// One dispatcher instance. Cheap to construct; safe to call `run_once`
/// from overlapping invocations (coordination lives in the store).
pub struct Dispatcher {
    store: Arc<JobStore>,
    provider: Arc<dyn Provider>,
    config: DispatcherConfig,
    worker_id: String,
}

impl Dispatcher {
    pub fn new(store: Arc<JobStore>, provider: Arc<dyn Provider>, config: DispatcherConfig) -> Self {
        // Distinct per instance so a stale lock names its dead owner.
        let worker_id = format!("dispatcher-{}", uuid::Uuid::new_v4());
        Self {
            store,
            provider,
            config,
            worker_id,
        }
    }

    /// Process one batch of due jobs and return the per-job outcomes.
    ///
    /// `limit` overrides the configured batch size for this invocation.
    pub async fn run_once(&self, limit: Option<u32>) -> Result<DispatchSummary> {
        let now = Utc::now();
        self.store
            .release_stale(now, Duration::seconds(self.config.stale_lock_secs as i64))?;

        let batch = self
            .store
            .due(now, limit.unwrap_or(self.config.batch_size))?;
        if batch.is_empty() {
            return Ok(DispatchSummary::default());
        }
        tracing::info!("📧 Dispatching {} due job(s)", batch.len());

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1) as usize));
        let mut tasks: JoinSet<Result<JobOutcome>> = JoinSet::new();
        let mut task_jobs: HashMap<tokio::task::Id, String> = HashMap::new();

        for job in batch {
            let store = Arc::clone(&self.store);
            let provider = Arc::clone(&self.provider);
            let config = self.config.clone();
            let worker_id = self.worker_id.clone();
            let semaphore = Arc::clone(&semaphore);
            let job_id = job.id.clone();
            let handle = tasks.spawn(async move {
                // Never closed, so acquisition cannot fail.
                let _permit = semaphore.acquire_owned().await.ok();
                process_job(&store, provider.as_ref(), &config, &worker_id, job).await
            });
            task_jobs.insert(handle.id(), job_id);
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(outcome))) => results.push(outcome),
                Ok((_, Err(e))) => {
                    // Store or adapter-config error: the invocation cannot
                    // proceed meaningfully. Completed jobs keep their state;
                    // in-flight claims are reclaimed as stale later.
                    tasks.abort_all();
                    return Err(e);
                }
                Err(join_err) => {
                    // A send task panicked. Contain it: this job alone gets a
                    // failed attempt, the rest of the batch is unaffected.
                    let Some(job_id) = task_jobs.get(&join_err.id()) else {
                        continue;
                    };
                    tracing::error!("⚠️ Send task for job {job_id} panicked: {join_err}");
                    results.push(self.record_panic(job_id)?);
                }
            }
        }

        Ok(DispatchSummary {
            processed: results.len(),
            results,
        })
    }

    fn record_panic(&self, job_id: &str) -> Result<JobOutcome> {
        let now = Utc::now();
        // One audit row per attempt, panics included. The attempt number is
        // read before record_failure bumps the counter.
        if let Some(job) = self.store.get(job_id)? {
            if let Err(e) = self.store.append_attempt(&AttemptRecord {
                job_id: job_id.to_string(),
                attempt_number: job.attempts + 1,
                success: false,
                provider: "dispatcher".into(),
                provider_message_id: None,
                error_message: Some("send task panicked".into()),
                latency_ms: 0,
            }) {
                tracing::warn!("💾 Failed to append audit row for job {job_id}: {e}");
            }
        }
        let decision = self.store.record_failure(
            job_id,
            "send task panicked",
            now,
            Duration::seconds(self.config.retry_delay_secs as i64),
        )?;
        Ok(match decision {
            RetryDecision::Retry { next_at, .. } => JobOutcome {
                id: job_id.to_string(),
                status: "retry".into(),
                error: Some("send task panicked".into()),
                next_attempt_at: Some(next_at),
                follow_on: None,
            },
            RetryDecision::Exhausted { .. } => JobOutcome {
                id: job_id.to_string(),
                status: "failed".into(),
                error: Some("send task panicked".into()),
                next_attempt_at: None,
                follow_on: None,
            },
        })
    }
}

/// Process one claimed-or-skipped job end to end.
async fn process_job(
    store: &JobStore,
    provider: &dyn Provider,
    config: &DispatcherConfig,
    worker_id: &str,
    job: Job,
) -> Result<JobOutcome> {
    let now = Utc::now();
    if !store.claim(&job.id, worker_id, now)? {
        // Another invocation won the row. Not an error.
        tracing::debug!("Job {} already claimed, skipping", job.id);
        return Ok(JobOutcome {
            id: job.id,
            status: "lock_conflict".into(),
            error: None,
            next_attempt_at: None,
            follow_on: None,
        });
    }

    // Legacy duplicate whose twin already went out: resolve without sending.
    if store.superseded_by_duplicate(&job)? {
        store.mark_skipped(&job.id, Utc::now())?;
        tracing::info!("Job {} superseded by an already-sent duplicate", job.id);
        return Ok(JobOutcome {
            id: job.id,
            status: "skipped".into(),
            error: None,
            next_attempt_at: None,
            follow_on: None,
        });
    }

    let message = OutboundMessage {
        to: job.recipient.clone(),
        subject: job.subject.clone(),
        body: job.body.clone(),
    };
    let send_timeout = std::time::Duration::from_secs(config.send_timeout_secs);

    let started = Instant::now();
    let result = match timeout(send_timeout, provider.send(&message)).await {
        Ok(result) => result?,
        Err(_) => SendResult::failure(
            provider.name(),
            format!("send timed out after {}s", config.send_timeout_secs),
        ),
    };
    let latency_ms = started.elapsed().as_millis() as i64;

    let attempt_number = job.attempts + 1;
    // Audit row first. If it cannot be written the delivery still happened,
    // so the job transition below must not be rolled back; log and move on.
    if let Err(e) = store.append_attempt(&AttemptRecord {
        job_id: job.id.clone(),
        attempt_number,
        success: result.success,
        provider: result.provider.clone(),
        provider_message_id: result.provider_message_id.clone(),
        error_message: result.error.clone(),
        latency_ms,
    }) {
        tracing::warn!("💾 Failed to append audit row for job {}: {e}", job.id);
    }

    if result.success {
        store.mark_sent(&job.id, Utc::now())?;
        tracing::info!(
            "✅ Sent job {} to {} via {} ({}ms)",
            job.id,
            job.recipient,
            result.provider,
            latency_ms
        );
        let follow_on = enqueue_follow_on(store, &job)?;
        return Ok(JobOutcome {
            id: job.id,
            status: "sent".into(),
            error: None,
            next_attempt_at: None,
            follow_on,
        });
    }

    let error = result
        .error
        .unwrap_or_else(|| "provider reported failure without detail".into());
    let decision = store.record_failure(
        &job.id,
        &error,
        Utc::now(),
        Duration::seconds(config.retry_delay_secs as i64),
    )?;
    Ok(match decision {
        RetryDecision::Retry { attempt, next_at } => {
            tracing::warn!(
                "⚠️ Job {} attempt {attempt}/{} failed: {error} — retrying at {next_at}",
                job.id,
                job.max_attempts
            );
            JobOutcome {
                id: job.id,
                status: "retry".into(),
                error: Some(error),
                next_attempt_at: Some(next_at),
                follow_on: None,
            }
        }
        RetryDecision::Exhausted { attempt } => {
            tracing::error!(
                "⚠️ Job {} failed permanently after {attempt} attempt(s): {error}",
                job.id
            );
            JobOutcome {
                id: job.id,
                status: "failed".into(),
                error: Some(error),
                next_attempt_at: None,
                follow_on: None,
            }
        }
    })
}

/// After a successful send of a recurring job, enqueue the next occurrence.
///
/// The next timestamp is computed from the completed job's *scheduled* time,
/// never from the clock, so a late send does not shift the cadence. The
/// dedupe key makes a crash-and-rerun between mark_sent and this insert
/// converge on a single follow-on row.
fn enqueue_follow_on(store: &JobStore, job: &Job) -> Result<Option<String>> {
    if job.cadence_type == CadenceType::Single {
        return Ok(None);
    }
    let Some(next_at) =
        outreach_cadence::next_occurrence(job.cadence_type, job.cadence_data.as_ref(), job.scheduled_at)
    else {
        return Ok(None);
    };

    let outcome = store.insert(NewJob {
        campaign_id: job.campaign_id.clone(),
        client_id: job.client_id.clone(),
        recipient: job.recipient.clone(),
        subject: job.subject.clone(),
        body: job.body.clone(),
        cadence_type: job.cadence_type,
        cadence_data: job.cadence_data,
        occurrence: job.occurrence + 1,
        dedupe_key: Some(job.next_dedupe_key()),
        scheduled_at: next_at,
        max_attempts: job.max_attempts,
    })?;
    tracing::info!(
        "📅 Enqueued occurrence {} of campaign {} at {next_at}",
        job.occurrence + 1,
        job.campaign_id
    );
    Ok(Some(outcome.id().to_string()))
}
