//! Advisory leases for background jobs.
//!
//! Jobs coordinate through the `sync_jobs` table: `SELECT ... FOR UPDATE
//! SKIP LOCKED` plus a `lock_expires_at` lease, so a crashed worker's lock
//! expires instead of wedging the job forever.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

/// Try to take the lease for `job_name` for `lease_minutes`. Returns false
/// when another worker holds the row lock or an unexpired lease.
pub async fn acquire_lock(
    pool: &PgPool,
    job_name: &str,
    lease_minutes: i64,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
        "SELECT id, lock_expires_at FROM sync_jobs WHERE job_name = $1 FOR UPDATE SKIP LOCKED",
    )
    .bind(job_name)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((job_id, lock_expires_at)) = row else {
        // Row-locked by another worker mid-acquire.
        debug!(job_name, "Job row locked by another worker");
        return Ok(false);
    };

    if let Some(expires) = lock_expires_at
        && expires > Utc::now()
    {
        debug!(job_name, expires = %expires, "Job already running");
        return Ok(false);
    }

    let lease_until = Utc::now() + Duration::minutes(lease_minutes);
    let locked_by = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned());
    sqlx::query("UPDATE sync_jobs SET lock_expires_at = $1, locked_by = $2 WHERE id = $3")
        .bind(lease_until)
        .bind(&locked_by)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(job_name, lease_until = %lease_until, "Acquired job lock");
    Ok(true)
}

/// Release the lease, recording the run's status and details.
pub async fn release_lock(
    pool: &PgPool,
    job_name: &str,
    status: &str,
    details: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE sync_jobs
        SET lock_expires_at = NULL,
            last_run_at = $2,
            last_status = $3,
            last_details = $4
        WHERE job_name = $1
        "#,
    )
    .bind(job_name)
    .bind(Utc::now())
    .bind(status)
    .bind(details)
    .execute(pool)
    .await?;
    Ok(())
}
