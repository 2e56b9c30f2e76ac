//! Holiday-greeting rotation storage: the per-asset fair-rotation counters
//! and the per-date pool assignments.

use crate::data::models::{CandidateRow, GreetingRotationRow};
use chrono::{Days, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

/// Greetings per daily pool.
const POOL_SIZE: usize = 4;

/// Enroll every greeting-named spots asset that is not yet in the rotation
/// table, then return the full rotation roster ordered by file name.
async fn rotation_roster(pool: &PgPool) -> Result<Vec<GreetingRotationRow>, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO holiday_greeting_rotation (asset_id, scheduled_count)
        SELECT a.id, 0
        FROM assets a
        JOIN instances i ON a.id = i.asset_id AND i.is_primary = TRUE
        WHERE a.duration_category = 'spots'
          AND (i.file_name ILIKE '%holiday%greeting%' OR a.content_title ILIKE '%holiday%greeting%')
        ON CONFLICT (asset_id) DO NOTHING
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query_as(
        r#"
        SELECT hgr.asset_id, i.file_name, hgr.scheduled_count
        FROM holiday_greeting_rotation hgr
        JOIN assets a ON hgr.asset_id = a.id
        JOIN instances i ON a.id = i.asset_id AND i.is_primary = TRUE
        LEFT JOIN scheduling_metadata sm ON a.id = sm.asset_id
        WHERE COALESCE(sm.available_for_scheduling, TRUE) = TRUE
        ORDER BY i.file_name
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Materialize per-day greeting pools for a schedule window, drawing evenly
/// from the rotation roster so each greeting lands on a similar number of
/// days. Existing assignments for the window's dates are replaced. Returns
/// the number of assignment rows written.
pub async fn assign_pools(
    pool: &PgPool,
    start_date: NaiveDate,
    num_days: u32,
) -> Result<usize, sqlx::Error> {
    let roster = rotation_roster(pool).await?;
    if roster.is_empty() {
        warn!("No holiday greetings available for daily assignment");
        return Ok(0);
    }

    let per_day = POOL_SIZE.min(roster.len());
    // Historical play counts seed the distribution, so greetings that were
    // short-changed by earlier schedules come up first.
    let mut usage: Vec<(i32, u32)> = roster
        .iter()
        .map(|g| (g.asset_id, g.scheduled_count.max(0) as u32))
        .collect();

    let mut tx = pool.begin().await?;
    let mut written = 0usize;

    for day_number in 0..num_days {
        let day = start_date + Days::new(day_number as u64);
        let day_end = day + Days::new(1);

        sqlx::query("DELETE FROM holiday_greetings_days WHERE start_date = $1")
            .bind(day)
            .execute(&mut *tx)
            .await?;

        // Least-used greetings first, keeping the distribution flat.
        usage.sort_by_key(|(_, count)| *count);
        for slot in 0..per_day {
            let asset_id = usage[slot].0;
            sqlx::query(
                r#"
                INSERT INTO holiday_greetings_days (asset_id, day_number, start_date, end_date)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(asset_id)
            .bind(day_number as i32 + 1)
            .bind(day)
            .bind(day_end)
            .execute(&mut *tx)
            .await?;
            usage[slot].1 += 1;
            written += 1;
        }
    }

    tx.commit().await?;
    info!(
        days = num_days,
        greetings = roster.len(),
        per_day,
        written,
        "Assigned holiday greeting daily pools"
    );
    Ok(written)
}

/// The greetings assigned to a date, in stable asset-id order. Expired
/// greetings are filtered out.
pub async fn pool_for_date(pool: &PgPool, date: NaiveDate) -> Result<Vec<CandidateRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            a.id AS asset_id,
            a.guid,
            i.id AS instance_id,
            a.content_type,
            a.content_title,
            a.duration_seconds,
            a.duration_category,
            a.engagement_score,
            a.theme,
            a.meeting_date,
            i.file_name,
            i.file_path,
            i.encoded_date,
            sm.last_scheduled_date,
            COALESCE(sm.total_airings, 0) AS total_airings,
            COALESCE(sm.featured, FALSE) AS featured,
            sm.content_expiry_date,
            sm.go_live_date
        FROM holiday_greetings_days hgd
        JOIN assets a ON hgd.asset_id = a.id
        JOIN instances i ON a.id = i.asset_id AND i.is_primary = TRUE
        LEFT JOIN scheduling_metadata sm ON a.id = sm.asset_id
        WHERE hgd.start_date <= $1
          AND hgd.end_date > $1
          AND (sm.content_expiry_date IS NULL OR sm.content_expiry_date > $2)
          AND COALESCE(sm.available_for_scheduling, TRUE) = TRUE
        ORDER BY hgd.asset_id
        "#,
    )
    .bind(date)
    .bind(date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc())
    .fetch_all(pool)
    .await
}

/// Bump the rotation counters for a placed greeting.
pub async fn record_play(pool: &PgPool, asset_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO holiday_greeting_rotation (asset_id, scheduled_count, last_scheduled)
        VALUES ($1, 1, $2)
        ON CONFLICT (asset_id) DO UPDATE SET
            scheduled_count = holiday_greeting_rotation.scheduled_count + 1,
            last_scheduled = EXCLUDED.last_scheduled
        "#,
    )
    .bind(asset_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
