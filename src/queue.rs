//! SQLite-backed job queue.
//!
//! Stands in for the external broker at the collaborator boundary:
//! at-least-once delivery, per-job max attempts, exponential backoff.
//! Stage handlers are written to tolerate redelivery, so the queue makes
//! no exactly-once promises. A claim carries a lease: a running job whose
//! worker died without completing or failing it becomes claimable again
//! once the lease expires, which is where the at-least-once guarantee
//! comes from. Completed jobs are deleted; jobs that exhaust their
//! attempts are kept with status `dead` and their last error for
//! inspection.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

/// Pipeline stage a job routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Extract,
    Process,
    Embed,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::Process => "process",
            JobType::Embed => "embed",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extract" => Ok(JobType::Extract),
            "process" => Ok(JobType::Process),
            "embed" => Ok(JobType::Embed),
            other => bail!("unknown job type: {}", other),
        }
    }
}

/// How long a claim stays valid. A running job whose `claimed_at` is
/// older than this is treated as abandoned and redelivered.
pub const CLAIM_LEASE_SECS: i64 = 300;

/// A claimed job. `attempts` already counts the in-flight delivery.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub document_id: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub backoff_secs: i64,
}

/// Enqueue a job for a document, due immediately.
pub async fn enqueue(
    pool: &SqlitePool,
    job_type: JobType,
    document_id: &str,
    max_attempts: i64,
    backoff_secs: i64,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let payload = serde_json::json!({ "document_id": document_id }).to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO jobs (job_type, payload, status, attempts, max_attempts, backoff_secs, available_at, created_at)
        VALUES (?, ?, 'queued', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(job_type.as_str())
    .bind(payload)
    .bind(max_attempts)
    .bind(backoff_secs)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Claim the oldest due job, if any, marking it running and counting the
/// delivery attempt. Due means queued and past `available_at`, or running
/// with an expired lease (its worker crashed without completing or
/// failing it). The conditional UPDATE is the claim: a row another worker
/// already claimed is skipped.
pub async fn claim_due(pool: &SqlitePool) -> Result<Option<Job>> {
    let now = chrono::Utc::now().timestamp();
    let lease_cutoff = now - CLAIM_LEASE_SECS;

    loop {
        let row = sqlx::query(
            r#"
            SELECT id, job_type, payload, status, attempts, max_attempts, backoff_secs, claimed_at
            FROM jobs
            WHERE (status = 'queued' AND available_at <= ?)
               OR (status = 'running' AND claimed_at <= ?)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(now)
        .bind(lease_cutoff)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        let status: String = row.get("status");

        let claimed = if status == "queued" {
            sqlx::query(
                "UPDATE jobs SET status = 'running', attempts = attempts + 1, claimed_at = ? WHERE id = ? AND status = 'queued'",
            )
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?
        } else {
            // Expired lease: reclaim only if no other worker refreshed it
            // since the SELECT.
            let observed: i64 = row.get("claimed_at");
            sqlx::query(
                "UPDATE jobs SET attempts = attempts + 1, claimed_at = ? WHERE id = ? AND status = 'running' AND claimed_at = ?",
            )
            .bind(now)
            .bind(id)
            .bind(observed)
            .execute(pool)
            .await?
        };

        if claimed.rows_affected() == 0 {
            continue; // lost the race, try the next due job
        }

        let job_type: String = row.get("job_type");
        let payload: String = row.get("payload");
        let parsed: serde_json::Value = serde_json::from_str(&payload)?;
        let document_id = parsed
            .get("document_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("job {} payload missing document_id", id))?
            .to_string();

        let attempts: i64 = row.get("attempts");

        return Ok(Some(Job {
            id,
            job_type: job_type.parse()?,
            document_id,
            attempts: attempts + 1,
            max_attempts: row.get("max_attempts"),
            backoff_secs: row.get("backoff_secs"),
        }));
    }
}

/// Remove a finished job (the enqueuing side asked for remove-on-complete).
pub async fn complete(pool: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed delivery: requeue with exponential backoff while
/// attempts remain, otherwise dead-letter the job.
pub async fn fail(pool: &SqlitePool, job: &Job, error: &str) -> Result<()> {
    if job.attempts >= job.max_attempts {
        sqlx::query("UPDATE jobs SET status = 'dead', last_error = ? WHERE id = ?")
            .bind(error)
            .bind(job.id)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let exponent = (job.attempts - 1).clamp(0, 16) as u32;
    let delay = job.backoff_secs.saturating_mul(1i64 << exponent);
    let available_at = chrono::Utc::now().timestamp() + delay;

    sqlx::query(
        "UPDATE jobs SET status = 'queued', available_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(available_at)
    .bind(error)
    .bind(job.id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Count jobs still queued or running.
pub async fn outstanding(pool: &SqlitePool) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'running')")
            .fetch_one(pool)
            .await?;
    Ok(count)
}
