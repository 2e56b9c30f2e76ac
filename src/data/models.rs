//! Row types shared across the data layer.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A ranked candidate as selected by the content queries: asset joined with
/// its primary instance and scheduling metadata.
#[derive(Debug, Clone, FromRow)]
pub struct CandidateRow {
    pub asset_id: i32,
    pub guid: Uuid,
    pub instance_id: Option<i32>,
    pub content_type: String,
    pub content_title: String,
    pub duration_seconds: f64,
    pub duration_category: String,
    pub engagement_score: Option<i32>,
    pub theme: Option<String>,
    pub meeting_date: Option<NaiveDate>,
    pub file_name: String,
    pub file_path: String,
    pub encoded_date: Option<DateTime<Utc>>,
    pub last_scheduled_date: Option<DateTime<Utc>>,
    pub total_airings: Option<i32>,
    pub featured: Option<bool>,
    pub content_expiry_date: Option<DateTime<Utc>>,
    pub go_live_date: Option<DateTime<Utc>>,
}

/// A schedule row with aggregate item stats.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduleRow {
    pub id: i32,
    pub schedule_name: String,
    pub air_date: NaiveDate,
    pub channel: String,
    pub active: bool,
    pub created_date: DateTime<Utc>,
    pub total_duration_seconds: f64,
    pub total_items: i64,
}

/// A scheduled item as served by the API.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScheduledItemRow {
    pub id: i32,
    pub schedule_id: i32,
    pub asset_id: Option<i32>,
    pub instance_id: Option<i32>,
    pub sequence_number: i32,
    pub scheduled_start_time: NaiveTime,
    pub scheduled_duration_seconds: f64,
    pub metadata: Option<serde_json::Value>,
    pub available_for_scheduling: bool,
    pub status: String,
    pub content_title: Option<String>,
    pub content_type: Option<String>,
    pub duration_category: Option<String>,
    pub theme: Option<String>,
    pub file_name: Option<String>,
}

/// A greeting enrolled in the fair-rotation table.
#[derive(Debug, Clone, FromRow)]
pub struct GreetingRotationRow {
    pub asset_id: i32,
    pub file_name: String,
    pub scheduled_count: i32,
}
