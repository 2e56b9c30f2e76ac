//! Periodic background jobs.
//!
//! The expiry sync keeps `content_expiry_date` current for content types
//! with a configured shelf life: expiry is the primary instance's encoded
//! date plus the per-type day count. Types configured with 0 days take their
//! expiry from remote metadata and are skipped here.

use crate::config::{Config, SchedulingConfig};
use crate::data::sync_jobs;
use crate::state::{AppState, WorkerHealth};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXPIRY_SYNC_JOB: &str = "expiry_sync";
const EXPIRY_SYNC_LEASE_MINUTES: i64 = 30;

/// Spawn the expiry-sync loop. Runs until cancelled.
pub fn spawn_expiry_sync(state: AppState, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if state.config.expiry_sync_interval_hours == 0 {
            state.health.report(EXPIRY_SYNC_JOB, WorkerHealth::Disabled);
            info!("Expiry sync disabled (interval is 0)");
            return;
        }
        let interval = Duration::from_secs(state.config.expiry_sync_interval_hours * 3600);
        let mut ticker = tokio::time::interval(interval);
        state.health.report(EXPIRY_SYNC_JOB, WorkerHealth::Running);
        info!(interval_hours = state.config.expiry_sync_interval_hours, "Expiry sync job started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Expiry sync job stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = run_expiry_sync(&state.db_pool, &state.config).await {
                        state.health.report(EXPIRY_SYNC_JOB, WorkerHealth::Failing);
                        error!(error = ?e, "Expiry sync failed");
                    } else {
                        state.health.report(EXPIRY_SYNC_JOB, WorkerHealth::Running);
                    }
                }
            }
        }
    })
}

/// One expiry-sync pass under the job lease.
pub async fn run_expiry_sync(pool: &PgPool, config: &Config) -> anyhow::Result<()> {
    if !sync_jobs::acquire_lock(pool, EXPIRY_SYNC_JOB, EXPIRY_SYNC_LEASE_MINUTES).await? {
        info!("Expiry sync already running elsewhere; skipping");
        return Ok(());
    }

    let scheduling = SchedulingConfig::load(&config.scheduling_file)?;
    let mut synced_types = 0u32;
    let mut updated_rows = 0u64;

    for (content_type, days) in &scheduling.content_expiration {
        if *days <= 0 {
            // Remote-metadata-driven expiry; owned by the upstream sync.
            continue;
        }
        match sync_content_type(pool, content_type, *days).await {
            Ok(rows) => {
                synced_types += 1;
                updated_rows += rows;
                info!(content_type, days, rows, "Synced content expirations");
            }
            Err(e) => warn!(content_type, error = ?e, "Failed to sync content expirations"),
        }
    }

    sync_jobs::release_lock(
        pool,
        EXPIRY_SYNC_JOB,
        "completed",
        json!({ "types": synced_types, "rows": updated_rows }),
    )
    .await?;
    Ok(())
}

/// Set `content_expiry_date = encoded_date + days` for every analyzed asset
/// of a content type whose primary instance has an encoded date.
async fn sync_content_type(
    pool: &PgPool,
    content_type: &str,
    days: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO scheduling_metadata (asset_id, content_expiry_date)
        SELECT a.id, i.encoded_date + make_interval(days => $2::int)
        FROM assets a
        JOIN instances i ON a.id = i.asset_id AND i.is_primary = TRUE
        WHERE lower(a.content_type) = lower($1)
          AND i.encoded_date IS NOT NULL
        ON CONFLICT (asset_id) DO UPDATE SET
            content_expiry_date = EXCLUDED.content_expiry_date
        "#,
    )
    .bind(content_type)
    .bind(days)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
