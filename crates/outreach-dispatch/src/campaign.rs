//! Campaign creation — turns one campaign definition into scheduled jobs.
//!
//! Validation happens here, synchronously, so a malformed cadence is
//! rejected before anything enters the store and dispatch never has to
//! care. Two materialization modes: eager (a bounded drip sequence created
//! up front) and lazy (one job; the dispatcher extends the chain after each
//! successful send). Both walk the same occurrence sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{CadenceType, CustomInterval};
use outreach_store::{JobStore, NewJob};

/// Longest drip sequence a single request may materialize up front.
const MAX_EAGER_OCCURRENCES: u32 = 100;

/// Campaign creation payload, as submitted by the composition UI.
/// Subject and content are opaque — the core never parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRequest {
    /// Caller-supplied campaign id; generated when absent.
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub cadence_type: String,
    #[serde(default)]
    pub cadence_data: Option<CustomInterval>,
    pub scheduled_at: DateTime<Utc>,
    /// `Some(n)` with n > 1 requests eager materialization of n jobs.
    #[serde(default)]
    pub occurrences: Option<u32>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// What a successful creation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCampaign {
    pub campaign_id: String,
    pub job_ids: Vec<String>,
}

/// Validate and materialize a campaign into the job store.
pub fn schedule_campaign(
    store: &JobStore,
    default_max_attempts: u32,
    request: CampaignRequest,
) -> Result<ScheduledCampaign> {
    if request.recipient.trim().is_empty() || !request.recipient.contains('@') {
        return Err(OutreachError::validation(format!(
            "invalid recipient address '{}'",
            request.recipient
        )));
    }
    if request.subject.trim().is_empty() {
        return Err(OutreachError::validation("subject must not be empty"));
    }

    let cadence = CadenceType::parse(&request.cadence_type)?;
    outreach_cadence::validate(cadence, request.cadence_data.as_ref())?;

    let count = match request.occurrences {
        Some(0) => {
            return Err(OutreachError::validation(
                "occurrences must be at least 1 when given",
            ))
        }
        Some(n) if n > MAX_EAGER_OCCURRENCES => {
            return Err(OutreachError::validation(format!(
                "occurrences may not exceed {MAX_EAGER_OCCURRENCES}"
            )))
        }
        Some(n) => n,
        // Lazy mode: one job now, recurrence extends the chain at dispatch.
        None => 1,
    };

    let campaign_id = request
        .campaign_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let max_attempts = request.max_attempts.unwrap_or(default_max_attempts).max(1);

    let times = outreach_cadence::materialize(
        cadence,
        request.cadence_data.as_ref(),
        request.scheduled_at,
        count,
    );

    let mut job_ids = Vec::with_capacity(times.len());
    for (occurrence, scheduled_at) in times.into_iter().enumerate() {
        let outcome = store.insert(NewJob {
            campaign_id: campaign_id.clone(),
            client_id: request.client_id.clone(),
            recipient: request.recipient.clone(),
            subject: request.subject.clone(),
            body: request.content.clone(),
            cadence_type: cadence,
            cadence_data: request.cadence_data,
            occurrence: occurrence as u32,
            dedupe_key: Some(format!("{campaign_id}:{occurrence}")),
            scheduled_at,
            max_attempts,
        })?;
        job_ids.push(outcome.id().to_string());
    }

    tracing::info!(
        "📅 Campaign {campaign_id} scheduled: {} job(s), cadence {}",
        job_ids.len(),
        cadence.as_str()
    );
    Ok(ScheduledCampaign {
        campaign_id,
        job_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use outreach_core::types::{IntervalUnit, JobStatus};

    fn request(cadence: &str) -> CampaignRequest {
        CampaignRequest {
            campaign_id: Some("camp-1".into()),
            client_id: Some("client-7".into()),
            recipient: "agent@example.com".into(),
            subject: "Monthly portfolio review".into(),
            content: "<p>Numbers attached.</p>".into(),
            cadence_type: cadence.into(),
            cadence_data: None,
            scheduled_at: "2024-03-01T09:00:00Z".parse().unwrap(),
            occurrences: None,
            max_attempts: None,
        }
    }

    #[test]
    fn test_lazy_mode_creates_one_job() {
        let store = JobStore::in_memory().unwrap();
        let scheduled = schedule_campaign(&store, 5, request("weekly")).unwrap();
        assert_eq!(scheduled.job_ids.len(), 1);
        let job = store.get(&scheduled.job_ids[0]).unwrap().unwrap();
        assert_eq!(job.occurrence, 0);
        assert_eq!(job.dedupe_key.as_deref(), Some("camp-1:0"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 5);
    }

    #[test]
    fn test_eager_mode_materializes_sequence() {
        let store = JobStore::in_memory().unwrap();
        let mut req = request("weekly");
        req.occurrences = Some(4);
        let scheduled = schedule_campaign(&store, 5, req).unwrap();
        assert_eq!(scheduled.job_ids.len(), 4);

        let jobs = store.jobs_for_campaign("camp-1").unwrap();
        let anchor: DateTime<Utc> = "2024-03-01T09:00:00Z".parse().unwrap();
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.occurrence, i as u32);
            assert_eq!(job.scheduled_at, anchor + Duration::days(7 * i as i64));
            assert_eq!(job.dedupe_key.as_deref(), Some(&format!("camp-1:{i}")[..]));
        }
    }

    #[test]
    fn test_single_ignores_occurrence_count() {
        let store = JobStore::in_memory().unwrap();
        let mut req = request("single");
        req.occurrences = Some(6);
        let scheduled = schedule_campaign(&store, 5, req).unwrap();
        assert_eq!(scheduled.job_ids.len(), 1);
    }

    #[test]
    fn test_resubmission_is_idempotent() {
        let store = JobStore::in_memory().unwrap();
        let first = schedule_campaign(&store, 5, request("weekly")).unwrap();
        let second = schedule_campaign(&store, 5, request("weekly")).unwrap();
        assert_eq!(first.job_ids, second.job_ids);
        assert_eq!(store.jobs_for_campaign("camp-1").unwrap().len(), 1);
    }

    #[test]
    fn test_validation_rejections() {
        let store = JobStore::in_memory().unwrap();

        let mut bad = request("weekly");
        bad.recipient = "not-an-address".into();
        assert!(matches!(
            schedule_campaign(&store, 5, bad),
            Err(OutreachError::Validation(_))
        ));

        let mut bad = request("weekly");
        bad.subject = "   ".into();
        assert!(schedule_campaign(&store, 5, bad).is_err());

        assert!(schedule_campaign(&store, 5, request("fortnightly")).is_err());

        // custom cadence without detail is rejected at creation, not dispatch
        assert!(schedule_campaign(&store, 5, request("custom")).is_err());

        let mut ok = request("custom");
        ok.cadence_data = Some(CustomInterval {
            n: 10,
            unit: IntervalUnit::Days,
        });
        assert!(schedule_campaign(&store, 5, ok).is_ok());

        // nothing leaked into the store from the rejected requests
        assert_eq!(store.jobs_for_campaign("camp-1").unwrap().len(), 1);
    }

    #[test]
    fn test_occurrence_bounds() {
        let store = JobStore::in_memory().unwrap();
        let mut req = request("weekly");
        req.occurrences = Some(0);
        assert!(schedule_campaign(&store, 5, req).is_err());

        let mut req = request("weekly");
        req.occurrences = Some(101);
        assert!(schedule_campaign(&store, 5, req).is_err());
    }
}
