//! Single-item operations on persisted schedules: reorder, delete, manual
//! add (including live-input placeholders), availability, and frame-accurate
//! time recalculation.

use crate::scheduler::timing::{FRAME_GAP_SECONDS, time_of_day};
use sqlx::PgPool;
use tracing::{info, warn};

/// Move the element at 0-based `from` to `to`. Returns false when either
/// position is out of range.
fn reorder_positions<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() {
        return false;
    }
    let moved = items.remove(from);
    items.insert(to, moved);
    true
}

/// Move the item at 0-based `from` to `to`, renumbering every item densely.
/// Returns false when the schedule is missing or a position is out of range.
pub async fn reorder(
    pool: &PgPool,
    schedule_id: i32,
    from: usize,
    to: usize,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let ids: Vec<(i32,)> = sqlx::query_as(
        "SELECT id FROM scheduled_items WHERE schedule_id = $1 ORDER BY sequence_number",
    )
    .bind(schedule_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut ids: Vec<i32> = ids.into_iter().map(|(id,)| id).collect();
    if !reorder_positions(&mut ids, from, to) {
        return Ok(false);
    }

    for (position, item_id) in ids.iter().enumerate() {
        sqlx::query("UPDATE scheduled_items SET sequence_number = $1 WHERE id = $2")
            .bind(position as i32 + 1)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!(schedule_id, from, to, "Reordered schedule items");
    Ok(true)
}

/// Delete one item: decrement the asset's airings (floor 0), renumber the
/// remaining items densely, and recompute the schedule's total duration.
pub async fn delete(pool: &PgPool, schedule_id: i32, item_id: i32) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let asset_id: Option<Option<i32>> = sqlx::query_scalar(
        "SELECT asset_id FROM scheduled_items WHERE id = $1 AND schedule_id = $2",
    )
    .bind(item_id)
    .bind(schedule_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(asset_id) = asset_id else {
        warn!(schedule_id, item_id, "No such item to delete");
        return Ok(false);
    };

    sqlx::query("DELETE FROM scheduled_items WHERE id = $1 AND schedule_id = $2")
        .bind(item_id)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    if let Some(asset_id) = asset_id {
        sqlx::query(
            "UPDATE scheduling_metadata SET total_airings = GREATEST(0, total_airings - 1) WHERE asset_id = $1",
        )
        .bind(asset_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        WITH numbered AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY sequence_number) AS new_seq
            FROM scheduled_items
            WHERE schedule_id = $1
        )
        UPDATE scheduled_items si
        SET sequence_number = numbered.new_seq
        FROM numbered
        WHERE si.id = numbered.id
        "#,
    )
    .bind(schedule_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE schedules
        SET total_duration_seconds = (
            SELECT COALESCE(SUM(scheduled_duration_seconds), 0)
            FROM scheduled_items
            WHERE schedule_id = $1
        )
        WHERE id = $1
        "#,
    )
    .bind(schedule_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(schedule_id, item_id, "Deleted schedule item");
    Ok(true)
}

/// Flip an item's availability flag. No effect on the persisted run; feeds
/// future builds' exclusion computation.
pub async fn toggle_availability(
    pool: &PgPool,
    schedule_id: i32,
    item_id: i32,
    available: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE scheduled_items SET available_for_scheduling = $1 WHERE id = $2 AND schedule_id = $3",
    )
    .bind(available)
    .bind(item_id)
    .bind(schedule_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// A manual addition to an existing schedule. With `asset_id` unset the item
/// is a live-input placeholder whose title travels in the metadata blob.
#[derive(Debug)]
pub struct AddItem {
    pub asset_id: Option<i32>,
    pub duration_seconds: f64,
    pub live_input_title: Option<String>,
}

/// Append an item at the end of a schedule, then rewrite all start times.
/// Returns the new item's id, or `None` when the asset has no primary
/// instance to play.
pub async fn add(
    pool: &PgPool,
    schedule_id: i32,
    request: &AddItem,
) -> Result<Option<i32>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let instance_id: Option<i32> = match request.asset_id {
        Some(asset_id) => {
            let id: Option<i32> = sqlx::query_scalar(
                "SELECT id FROM instances WHERE asset_id = $1 AND is_primary = TRUE",
            )
            .bind(asset_id)
            .fetch_optional(&mut *tx)
            .await?;
            if id.is_none() {
                warn!(asset_id, "Asset has no primary instance; cannot add to schedule");
                return Ok(None);
            }
            id
        }
        None => None,
    };

    let metadata = request.live_input_title.as_ref().map(|title| {
        serde_json::json!({ "is_live_input": true, "title": title })
    });

    let next_seq: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM scheduled_items WHERE schedule_id = $1",
    )
    .bind(schedule_id)
    .fetch_one(&mut *tx)
    .await?;

    let item_id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO scheduled_items (
            schedule_id, asset_id, instance_id, sequence_number,
            scheduled_start_time, scheduled_duration_seconds, metadata, status
        ) VALUES ($1, $2, $3, $4, '00:00:00', $5, $6, 'scheduled')
        RETURNING id
        "#,
    )
    .bind(schedule_id)
    .bind(request.asset_id)
    .bind(instance_id)
    .bind(next_seq as i32)
    .bind(request.duration_seconds)
    .bind(&metadata)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    recalculate_times(pool, schedule_id).await?;
    info!(schedule_id, item_id, live = request.asset_id.is_none(), "Added item to schedule");
    Ok(Some(item_id))
}

/// Rewrite every item's start time from 00:00:00.000000, charging one frame
/// gap between adjacent items (none after the last), and refresh the
/// schedule's total duration.
pub async fn recalculate_times(pool: &PgPool, schedule_id: i32) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let items: Vec<(i32, f64)> = sqlx::query_as(
        r#"
        SELECT id, scheduled_duration_seconds
        FROM scheduled_items
        WHERE schedule_id = $1
        ORDER BY sequence_number
        "#,
    )
    .bind(schedule_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut current_time = 0.0_f64;
    let last_index = items.len().saturating_sub(1);
    for (index, (item_id, duration)) in items.iter().enumerate() {
        sqlx::query("UPDATE scheduled_items SET scheduled_start_time = $1 WHERE id = $2")
            .bind(time_of_day(current_time))
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        current_time += duration;
        if index < last_index {
            current_time += FRAME_GAP_SECONDS;
        }
    }

    sqlx::query("UPDATE schedules SET total_duration_seconds = $1 WHERE id = $2")
        .bind(current_time)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
