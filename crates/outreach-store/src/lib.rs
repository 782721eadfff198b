//! # Outreach Store
//!
//! SQLite-backed job store — the one shared mutable resource in the system.
//! All coordination between overlapping dispatcher invocations flows through
//! conditional row updates here; there is no in-memory lock anywhere else.
//!
//! Two tables: `jobs` (the schedule, with a small state machine) and
//! `delivery_attempts` (append-only audit log, one row per provider call).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{CadenceType, CustomInterval, DeliveryAttempt, Job, JobStatus};

/// A job to be inserted. The store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub campaign_id: String,
    pub client_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub cadence_type: CadenceType,
    pub cadence_data: Option<CustomInterval>,
    pub occurrence: u32,
    pub dedupe_key: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub max_attempts: u32,
}

/// Outcome of an insert: a fresh row, or a no-op against an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(String),
    /// A non-cancelled row with the same dedupe_key already exists; its id
    /// is returned and nothing was written.
    Duplicate(String),
}

impl InsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            InsertOutcome::Created(id) | InsertOutcome::Duplicate(id) => id,
        }
    }
}

/// What `record_failure` decided for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`, scheduled at the given time.
    Retry {
        attempt: u32,
        next_at: DateTime<Utc>,
    },
    /// Attempts exhausted; the job is now terminal `failed`.
    Exhausted { attempt: u32 },
}

/// Fields recorded for one delivery attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub job_id: String,
    pub attempt_number: u32,
    pub success: bool,
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i64,
}

/// The durable job store.
pub struct JobStore {
    conn: Mutex<Connection>,
}

fn db(e: rusqlite::Error) -> OutreachError {
    OutreachError::Persistence(e.to_string())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| OutreachError::persistence(format!("bad timestamp '{s}': {e}")))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

impl JobStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db)?;
        // WAL mode for concurrent readers alongside the dispatcher's writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA busy_timeout=5000;").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                client_id TEXT,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                cadence_type TEXT NOT NULL,
                cadence_data TEXT,              -- JSON: {n, unit} for 'custom'
                occurrence INTEGER NOT NULL DEFAULT 0,
                dedupe_key TEXT,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 5,
                last_attempt_at TEXT,
                locked_at TEXT,
                locked_by TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One active row per dedupe key; cancelled rows free the key.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_dedupe
                ON jobs(dedupe_key)
                WHERE dedupe_key IS NOT NULL AND status != 'cancelled';

            CREATE INDEX IF NOT EXISTS idx_jobs_due
                ON jobs(status, scheduled_at);

            CREATE INDEX IF NOT EXISTS idx_jobs_campaign
                ON jobs(campaign_id);

            -- Append-only audit log. Never updated, never deleted.
            CREATE TABLE IF NOT EXISTS delivery_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                attempt_number INTEGER NOT NULL,
                status TEXT NOT NULL,           -- 'success' | 'failure'
                provider TEXT NOT NULL,
                provider_message_id TEXT,
                error_message TEXT,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_job
                ON delivery_attempts(job_id);
            ",
        )
        .map_err(db)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; the connection is
        // still usable for independent statements.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ─── Inserts ──────────────────────────────────────────────

    /// Insert a job. A dedupe collision is a no-op returning the existing
    /// row's id — this is what makes recurrence re-enqueue idempotent when
    /// a crash lands between send success and the follow-on insert.
    pub fn insert(&self, job: NewJob) -> Result<InsertOutcome> {
        let conn = self.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let cadence_data = job
            .cadence_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| OutreachError::persistence(format!("serialize cadence_data: {e}")))?;

        let inserted = conn
            .execute(
                "INSERT INTO jobs
                   (id, campaign_id, client_id, recipient, subject, body,
                    cadence_type, cadence_data, occurrence, dedupe_key,
                    scheduled_at, status, attempts, max_attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', 0, ?12, ?13, ?13)
                 ON CONFLICT DO NOTHING",
                params![
                    id,
                    job.campaign_id,
                    job.client_id,
                    job.recipient,
                    job.subject,
                    job.body,
                    job.cadence_type.as_str(),
                    cadence_data,
                    job.occurrence,
                    job.dedupe_key,
                    job.scheduled_at.to_rfc3339(),
                    job.max_attempts,
                    now,
                ],
            )
            .map_err(db)?;

        if inserted == 1 {
            return Ok(InsertOutcome::Created(id));
        }

        // Conflict on the partial dedupe index — hand back the winner.
        let key = job
            .dedupe_key
            .ok_or_else(|| OutreachError::persistence("insert affected zero rows"))?;
        let existing: String = conn
            .query_row(
                "SELECT id FROM jobs
                 WHERE dedupe_key = ?1 AND status != 'cancelled'
                 LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    // ─── Due-work query ───────────────────────────────────────

    /// Pending jobs whose time has come, oldest first, bounded batch.
    /// Terminal rows (including `cancelled`) are never selected.
    pub fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM jobs
                 WHERE status = 'pending' AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC
                 LIMIT ?2",
            )
            .map_err(db)?;
        let raw: Vec<RawJob> = stmt
            .query_map(params![now.to_rfc3339(), limit], RawJob::from_row)
            .map_err(db)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db)?;
        raw.into_iter().map(RawJob::into_job).collect()
    }

    // ─── Claim & state transitions ────────────────────────────

    /// Claim-or-tell-me-you-lost. A single conditional update transitions
    /// `pending` -> `processing` only if the row is still unclaimed; zero
    /// rows affected means another invocation won the race and the caller
    /// must skip the job without error.
    pub fn claim(&self, job_id: &str, worker: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let rows = conn
            .execute(
                "UPDATE jobs
                 SET status = 'processing', locked_at = ?2, locked_by = ?3, updated_at = ?2
                 WHERE id = ?1 AND status = 'pending' AND locked_at IS NULL",
                params![job_id, now.to_rfc3339(), worker],
            )
            .map_err(db)?;
        Ok(rows == 1)
    }

    /// Return jobs stuck in `processing` with a lock older than the window
    /// to `pending` — a dispatcher instance died mid-send. No attempt is
    /// consumed by the reclaim.
    pub fn release_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> Result<usize> {
        let cutoff = (now - stale_after).to_rfc3339();
        let conn = self.lock();
        let rows = conn
            .execute(
                "UPDATE jobs
                 SET status = 'pending', locked_at = NULL, locked_by = NULL, updated_at = ?2
                 WHERE status = 'processing' AND locked_at IS NOT NULL AND locked_at < ?1",
                params![cutoff, now.to_rfc3339()],
            )
            .map_err(db)?;
        if rows > 0 {
            tracing::warn!("⏰ Reclaimed {rows} job(s) with stale locks");
        }
        Ok(rows)
    }

    /// Terminal success.
    pub fn mark_sent(&self, job_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE jobs
             SET status = 'sent', last_attempt_at = ?2, locked_at = NULL,
                 locked_by = NULL, error_message = NULL, updated_at = ?2
             WHERE id = ?1",
            params![job_id, now.to_rfc3339()],
        )
        .map_err(db)?;
        Ok(())
    }

    /// Terminal skip — the job was superseded by a duplicate that already
    /// went out. No attempt is consumed.
    pub fn mark_skipped(&self, job_id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE jobs
             SET status = 'skipped', locked_at = NULL, locked_by = NULL, updated_at = ?2
             WHERE id = ?1",
            params![job_id, now.to_rfc3339()],
        )
        .map_err(db)?;
        Ok(())
    }

    /// Record a failed attempt: either bump `scheduled_at` by the backoff
    /// and go back to `pending`, or — at the attempt ceiling — end `failed`.
    pub fn record_failure(
        &self,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
        retry_delay: Duration,
    ) -> Result<RetryDecision> {
        let conn = self.lock();
        let (attempts, max_attempts): (u32, u32) = conn
            .query_row(
                "SELECT attempts, max_attempts FROM jobs WHERE id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db)?;

        let attempt = attempts + 1;
        if attempt >= max_attempts {
            conn.execute(
                "UPDATE jobs
                 SET status = 'failed', attempts = ?2, last_attempt_at = ?3,
                     locked_at = NULL, locked_by = NULL, error_message = ?4, updated_at = ?3
                 WHERE id = ?1",
                params![job_id, attempt, now.to_rfc3339(), error],
            )
            .map_err(db)?;
            Ok(RetryDecision::Exhausted { attempt })
        } else {
            // Linear backoff: attempt N is retried after N * retry_delay.
            let next_at = now + retry_delay * attempt as i32;
            conn.execute(
                "UPDATE jobs
                 SET status = 'pending', attempts = ?2, last_attempt_at = ?3,
                     scheduled_at = ?4, locked_at = NULL, locked_by = NULL,
                     error_message = ?5, updated_at = ?3
                 WHERE id = ?1",
                params![
                    job_id,
                    attempt,
                    now.to_rfc3339(),
                    next_at.to_rfc3339(),
                    error
                ],
            )
            .map_err(db)?;
            Ok(RetryDecision::Retry { attempt, next_at })
        }
    }

    /// Campaign pause/cancel: still-`pending` jobs become terminal
    /// `cancelled`; the due-work query then never sees them.
    pub fn cancel_campaign(&self, campaign_id: &str) -> Result<usize> {
        let conn = self.lock();
        let rows = conn
            .execute(
                "UPDATE jobs
                 SET status = 'cancelled', updated_at = ?2
                 WHERE campaign_id = ?1 AND status = 'pending'",
                params![campaign_id, Utc::now().to_rfc3339()],
            )
            .map_err(db)?;
        Ok(rows)
    }

    /// True when another job with the same dedupe key already reached
    /// `sent` — this one is a leftover duplicate and should be skipped.
    pub fn superseded_by_duplicate(&self, job: &Job) -> Result<bool> {
        let Some(key) = &job.dedupe_key else {
            return Ok(false);
        };
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM jobs
                 WHERE dedupe_key = ?1 AND id != ?2 AND status = 'sent'",
                params![key, job.id],
                |row| row.get(0),
            )
            .map_err(db)?;
        Ok(count > 0)
    }

    // ─── Audit log ────────────────────────────────────────────

    /// Append one audit row. Called once per provider call, independent of
    /// whether the job row update afterwards succeeds.
    pub fn append_attempt(&self, record: &AttemptRecord) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO delivery_attempts
               (job_id, attempt_number, status, provider, provider_message_id,
                error_message, latency_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.job_id,
                record.attempt_number,
                if record.success { "success" } else { "failure" },
                record.provider,
                record.provider_message_id,
                record.error_message,
                record.latency_ms,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db)?;
        Ok(conn.last_insert_rowid())
    }

    /// All audit rows for a job, oldest first.
    pub fn attempts_for(&self, job_id: &str) -> Result<Vec<DeliveryAttempt>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, attempt_number, status, provider,
                        provider_message_id, error_message, latency_ms, created_at
                 FROM delivery_attempts
                 WHERE job_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(db)?;
        let raw: Vec<(i64, String, u32, String, String, Option<String>, Option<String>, i64, String)> =
            stmt.query_map(params![job_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })
            .map_err(db)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db)?;

        raw.into_iter()
            .map(
                |(id, job_id, attempt_number, status, provider, mid, err, latency, created)| {
                    Ok(DeliveryAttempt {
                        id,
                        job_id,
                        attempt_number,
                        status,
                        provider,
                        provider_message_id: mid,
                        error_message: err,
                        latency_ms: latency,
                        created_at: parse_ts(&created)?,
                    })
                },
            )
            .collect()
    }

    // ─── Reads ────────────────────────────────────────────────

    pub fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![job_id],
                RawJob::from_row,
            )
            .optional()
            .map_err(db)?;
        raw.map(RawJob::into_job).transpose()
    }

    pub fn jobs_for_campaign(&self, campaign_id: &str) -> Result<Vec<Job>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM jobs WHERE campaign_id = ?1
                 ORDER BY occurrence ASC, scheduled_at ASC",
            )
            .map_err(db)?;
        let raw: Vec<RawJob> = stmt
            .query_map(params![campaign_id], RawJob::from_row)
            .map_err(db)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db)?;
        raw.into_iter().map(RawJob::into_job).collect()
    }
}

/// Raw column values pulled inside the rusqlite closure; converted to the
/// typed `Job` outside so conversion failures surface as persistence errors.
struct RawJob {
    id: String,
    campaign_id: String,
    client_id: Option<String>,
    recipient: String,
    subject: String,
    body: String,
    cadence_type: String,
    cadence_data: Option<String>,
    occurrence: u32,
    dedupe_key: Option<String>,
    scheduled_at: String,
    status: String,
    attempts: u32,
    max_attempts: u32,
    last_attempt_at: Option<String>,
    locked_at: Option<String>,
    locked_by: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            campaign_id: row.get("campaign_id")?,
            client_id: row.get("client_id")?,
            recipient: row.get("recipient")?,
            subject: row.get("subject")?,
            body: row.get("body")?,
            cadence_type: row.get("cadence_type")?,
            cadence_data: row.get("cadence_data")?,
            occurrence: row.get("occurrence")?,
            dedupe_key: row.get("dedupe_key")?,
            scheduled_at: row.get("scheduled_at")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            last_attempt_at: row.get("last_attempt_at")?,
            locked_at: row.get("locked_at")?,
            locked_by: row.get("locked_by")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let cadence_data = self
            .cadence_data
            .as_deref()
            .map(serde_json::from_str::<CustomInterval>)
            .transpose()
            .map_err(|e| OutreachError::persistence(format!("bad cadence_data: {e}")))?;
        Ok(Job {
            id: self.id,
            campaign_id: self.campaign_id,
            client_id: self.client_id,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
            cadence_type: CadenceType::parse(&self.cadence_type)?,
            cadence_data,
            occurrence: self.occurrence,
            dedupe_key: self.dedupe_key,
            scheduled_at: parse_ts(&self.scheduled_at)?,
            status: JobStatus::parse(&self.status)?,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_attempt_at: parse_ts_opt(self.last_attempt_at)?,
            locked_at: parse_ts_opt(self.locked_at)?,
            locked_by: self.locked_by,
            error_message: self.error_message,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_job(campaign: &str, dedupe: Option<&str>) -> NewJob {
        NewJob {
            campaign_id: campaign.to_string(),
            client_id: Some("client-1".into()),
            recipient: "agent@example.com".into(),
            subject: "Quarterly check-in".into(),
            body: "<p>Hello!</p>".into(),
            cadence_type: CadenceType::Single,
            cadence_data: None,
            occurrence: 0,
            dedupe_key: dedupe.map(String::from),
            scheduled_at: Utc::now() - Duration::seconds(1),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::in_memory().unwrap();
        let outcome = store.insert(new_job("c1", None)).unwrap();
        let InsertOutcome::Created(id) = outcome else {
            panic!("expected fresh insert");
        };
        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.campaign_id, "c1");
    }

    #[test]
    fn test_dedupe_insert_is_noop() {
        let store = JobStore::in_memory().unwrap();
        let first = store.insert(new_job("c1", Some("c1:0"))).unwrap();
        let second = store.insert(new_job("c1", Some("c1:0"))).unwrap();
        assert!(matches!(second, InsertOutcome::Duplicate(_)));
        assert_eq!(first.id(), second.id());
        assert_eq!(store.jobs_for_campaign("c1").unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_row_frees_dedupe_key() {
        let store = JobStore::in_memory().unwrap();
        store.insert(new_job("c1", Some("c1:0"))).unwrap();
        store.cancel_campaign("c1").unwrap();
        let again = store.insert(new_job("c1", Some("c1:0"))).unwrap();
        assert!(matches!(again, InsertOutcome::Created(_)));
    }

    #[test]
    fn test_due_excludes_future_and_cancelled() {
        let store = JobStore::in_memory().unwrap();
        store.insert(new_job("past", None)).unwrap();
        let mut future = new_job("future", None);
        future.scheduled_at = Utc::now() + Duration::hours(1);
        store.insert(future).unwrap();
        store.insert(new_job("gone", None)).unwrap();
        store.cancel_campaign("gone").unwrap();

        let due = store.due(Utc::now(), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].campaign_id, "past");
    }

    #[test]
    fn test_due_is_ordered_and_bounded() {
        let store = JobStore::in_memory().unwrap();
        for i in 0..5 {
            let mut j = new_job(&format!("c{i}"), None);
            j.scheduled_at = Utc::now() - Duration::minutes(10 - i);
            store.insert(j).unwrap();
        }
        let due = store.due(Utc::now(), 3).unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].scheduled_at <= w[1].scheduled_at));
        // oldest first
        assert_eq!(due[0].campaign_id, "c0");
    }

    #[test]
    fn test_claim_transitions_to_processing() {
        let store = JobStore::in_memory().unwrap();
        let id = store.insert(new_job("c1", None)).unwrap().id().to_string();
        assert!(store.claim(&id, "worker-a", Utc::now()).unwrap());
        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.locked_by.as_deref(), Some("worker-a"));
        assert!(job.locked_at.is_some());
        // second claim loses
        assert!(!store.claim(&id, "worker-b", Utc::now()).unwrap());
    }

    #[test]
    fn test_exactly_one_claim_under_race() {
        let store = Arc::new(JobStore::in_memory().unwrap());
        let id = store.insert(new_job("c1", None)).unwrap().id().to_string();

        let mut handles = Vec::new();
        for n in 0..2 {
            let store = store.clone();
            let id = id.clone();
            handles.push(std::thread::spawn(move || {
                store.claim(&id, &format!("worker-{n}"), Utc::now()).unwrap()
            }));
        }
        let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(wins.iter().filter(|w| **w).count(), 1);
        assert_eq!(wins.iter().filter(|w| !**w).count(), 1);
    }

    #[test]
    fn test_record_failure_retries_then_exhausts() {
        let store = JobStore::in_memory().unwrap();
        let mut j = new_job("c1", None);
        j.max_attempts = 3;
        let id = store.insert(j).unwrap().id().to_string();
        let delay = Duration::seconds(120);

        for attempt in 1..3 {
            assert!(store.claim(&id, "w", Utc::now()).unwrap());
            let now = Utc::now();
            let decision = store.record_failure(&id, "boom", now, delay).unwrap();
            match decision {
                RetryDecision::Retry { attempt: a, next_at } => {
                    assert_eq!(a, attempt);
                    assert_eq!(next_at, now + delay * attempt as i32);
                }
                RetryDecision::Exhausted { .. } => panic!("exhausted too early"),
            }
            let job = store.get(&id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.attempts, attempt);
            assert!(job.locked_at.is_none());
            // claimable again after the bump — reset scheduled_at for the test
            let conn = store.lock();
            conn.execute(
                "UPDATE jobs SET scheduled_at = ?2 WHERE id = ?1",
                params![id, (Utc::now() - Duration::seconds(1)).to_rfc3339()],
            )
            .unwrap();
            drop(conn);
        }

        assert!(store.claim(&id, "w", Utc::now()).unwrap());
        let decision = store
            .record_failure(&id, "boom", Utc::now(), delay)
            .unwrap();
        assert_eq!(decision, RetryDecision::Exhausted { attempt: 3 });
        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_release_stale_reclaims_old_locks_only() {
        let store = JobStore::in_memory().unwrap();
        let id = store.insert(new_job("c1", None)).unwrap().id().to_string();
        // claim twenty minutes ago
        let then = Utc::now() - Duration::minutes(20);
        assert!(store.claim(&id, "dead-worker", then).unwrap());

        let fresh = store.insert(new_job("c2", None)).unwrap().id().to_string();
        assert!(store.claim(&fresh, "live-worker", Utc::now()).unwrap());

        let reclaimed = store
            .release_stale(Utc::now(), Duration::minutes(10))
            .unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(
            store.get(&id).unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            store.get(&fresh).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn test_mark_sent_and_audit_log() {
        let store = JobStore::in_memory().unwrap();
        let id = store.insert(new_job("c1", None)).unwrap().id().to_string();
        store.claim(&id, "w", Utc::now()).unwrap();
        store
            .append_attempt(&AttemptRecord {
                job_id: id.clone(),
                attempt_number: 1,
                success: true,
                provider: "mock".into(),
                provider_message_id: Some("mock-1".into()),
                error_message: None,
                latency_ms: 12,
            })
            .unwrap();
        store.mark_sent(&id, Utc::now()).unwrap();

        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Sent);
        assert!(job.locked_at.is_none());

        let attempts = store.attempts_for(&id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, "success");
        assert_eq!(attempts[0].provider_message_id.as_deref(), Some("mock-1"));
    }

    #[test]
    fn test_superseded_by_duplicate() {
        let store = JobStore::in_memory().unwrap();
        let sent = store.insert(new_job("c1", Some("c1:0"))).unwrap();
        store.claim(sent.id(), "w", Utc::now()).unwrap();
        store.mark_sent(sent.id(), Utc::now()).unwrap();

        // The unique index makes such duplicates impossible for new rows;
        // simulate a database that predates it.
        let conn = store.lock();
        conn.execute("DROP INDEX idx_jobs_dedupe", []).unwrap();
        conn.execute(
            "INSERT INTO jobs (id, campaign_id, recipient, subject, body,
                               cadence_type, occurrence, dedupe_key, scheduled_at,
                               status, attempts, max_attempts, created_at, updated_at)
             VALUES ('dup-1', 'c1', 'a@b.c', 's', 'b', 'single', 0, 'c1:0',
                     ?1, 'pending', 0, 5, ?1, ?1)",
            params![Utc::now().to_rfc3339()],
        )
        .unwrap();
        drop(conn);

        let dup = store.get("dup-1").unwrap().unwrap();
        assert!(store.superseded_by_duplicate(&dup).unwrap());

        let original = store.get(sent.id()).unwrap().unwrap();
        assert!(!store.superseded_by_duplicate(&original).unwrap());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(&dir.path().join("outreach.db")).unwrap();
        store.insert(new_job("c1", None)).unwrap();
        assert_eq!(store.due(Utc::now(), 10).unwrap().len(), 1);
    }
}
