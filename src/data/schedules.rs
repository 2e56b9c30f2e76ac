//! Schedule rows and bulk item persistence.

use crate::data::models::{ScheduleRow, ScheduledItemRow};
use crate::scheduler::store::NewScheduledItem;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::info;

const DEFAULT_CHANNEL: &str = "Channel 26";

/// Find an active schedule whose window starts on `air_date`.
pub async fn find_by_date(pool: &PgPool, air_date: NaiveDate) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM schedules WHERE air_date = $1 AND active = TRUE LIMIT 1")
        .bind(air_date)
        .fetch_optional(pool)
        .await
}

/// Insert a new empty schedule row, returning its id.
pub async fn create(pool: &PgPool, name: &str, air_date: NaiveDate) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO schedules (schedule_name, air_date, channel, active)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(air_date)
    .bind(DEFAULT_CHANNEL)
    .fetch_one(pool)
    .await
}

/// Persist a build's items in one transaction, in sequence order.
pub async fn save_items(
    pool: &PgPool,
    schedule_id: i32,
    items: &[NewScheduledItem],
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO scheduled_items (
                schedule_id, asset_id, instance_id, sequence_number,
                scheduled_start_time, scheduled_duration_seconds, metadata, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'scheduled')
            "#,
        )
        .bind(schedule_id)
        .bind(item.asset_id)
        .bind(item.instance_id)
        .bind(item.sequence_number)
        .bind(item.scheduled_start_time)
        .bind(item.scheduled_duration_seconds)
        .bind(&item.metadata)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(items.len())
}

pub async fn update_duration(
    pool: &PgPool,
    schedule_id: i32,
    total_seconds: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE schedules SET total_duration_seconds = $1 WHERE id = $2")
        .bind(total_seconds)
        .bind(schedule_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a schedule. Each referenced asset's `total_airings` is decremented
/// by its in-schedule count before the row (and its items, by cascade) goes.
/// Returns false when the schedule does not exist.
pub async fn delete(pool: &PgPool, schedule_id: i32) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let asset_counts: Vec<(i32, i64)> = sqlx::query_as(
        r#"
        SELECT asset_id, COUNT(*) FROM scheduled_items
        WHERE schedule_id = $1 AND asset_id IS NOT NULL
        GROUP BY asset_id
        "#,
    )
    .bind(schedule_id)
    .fetch_all(&mut *tx)
    .await?;

    for (asset_id, count) in &asset_counts {
        sqlx::query(
            "UPDATE scheduling_metadata SET total_airings = GREATEST(0, total_airings - $1) WHERE asset_id = $2",
        )
        .bind(*count as i32)
        .bind(asset_id)
        .execute(&mut *tx)
        .await?;
    }

    let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let deleted = result.rows_affected() > 0;
    if deleted {
        info!(
            schedule_id,
            assets = asset_counts.len(),
            "Deleted schedule and decremented airings"
        );
    }
    Ok(deleted)
}

/// Active schedules, optionally bounded by an air-date range.
pub async fn list_active(
    pool: &PgPool,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<Vec<ScheduleRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            s.id, s.schedule_name, s.air_date, s.channel, s.active,
            s.created_date, s.total_duration_seconds,
            COUNT(si.id) AS total_items
        FROM schedules s
        LEFT JOIN scheduled_items si ON s.id = si.schedule_id
        WHERE s.active = TRUE
          AND ($1::date IS NULL OR s.air_date >= $1)
          AND ($2::date IS NULL OR s.air_date <= $2)
        GROUP BY s.id
        ORDER BY s.air_date DESC, s.id DESC
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .fetch_all(pool)
    .await
}

/// A schedule header by id, with aggregate item stats.
pub async fn get_by_id(pool: &PgPool, schedule_id: i32) -> Result<Option<ScheduleRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            s.id, s.schedule_name, s.air_date, s.channel, s.active,
            s.created_date, s.total_duration_seconds,
            COUNT(si.id) AS total_items
        FROM schedules s
        LEFT JOIN scheduled_items si ON s.id = si.schedule_id
        WHERE s.id = $1
        GROUP BY s.id
        "#,
    )
    .bind(schedule_id)
    .fetch_optional(pool)
    .await
}

/// All items of a schedule in sequence order, joined with asset details.
pub async fn list_items(
    pool: &PgPool,
    schedule_id: i32,
) -> Result<Vec<ScheduledItemRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            si.id, si.schedule_id, si.asset_id, si.instance_id,
            si.sequence_number, si.scheduled_start_time,
            si.scheduled_duration_seconds, si.metadata,
            si.available_for_scheduling, si.status,
            a.content_title, a.content_type, a.duration_category, a.theme,
            i.file_name
        FROM scheduled_items si
        LEFT JOIN assets a ON si.asset_id = a.id
        LEFT JOIN instances i ON si.instance_id = i.id
        WHERE si.schedule_id = $1
        ORDER BY si.sequence_number
        "#,
    )
    .bind(schedule_id)
    .fetch_all(pool)
    .await
}
