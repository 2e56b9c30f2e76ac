//! The asset-store seam the builder runs against.
//!
//! Every suspension point of the core goes through [`SchedulerStore`]; the
//! production implementation is [`PgStore`], and tests drive the builder
//! against an in-memory fake.

use crate::config::SchedulingConfig;
use crate::data;
use crate::data::models::CandidateRow;
use crate::scheduler::rotation::{DurationCategory, RotationToken};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

/// A selectable piece of content, as returned by the store's ranked queries.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub asset_id: i32,
    pub guid: uuid::Uuid,
    pub instance_id: Option<i32>,
    pub content_type: String,
    pub content_title: String,
    pub duration_seconds: f64,
    pub duration_category: DurationCategory,
    pub engagement_score: Option<i32>,
    pub theme: Option<String>,
    pub meeting_date: Option<NaiveDate>,
    pub file_name: String,
    pub file_path: String,
    pub encoded_date: Option<DateTime<Utc>>,
    pub last_scheduled_date: Option<DateTime<Utc>>,
    pub total_airings: i32,
    pub featured: bool,
    pub content_expiry_date: Option<DateTime<Utc>>,
    pub go_live_date: Option<DateTime<Utc>>,
    /// Delay reduction factor the candidate was retrieved under.
    pub delay_factor_used: f64,
    /// Whether a category reset was required to surface this candidate.
    pub was_reset: bool,
}

impl From<CandidateRow> for Candidate {
    fn from(row: CandidateRow) -> Self {
        let duration_category = DurationCategory::parse(&row.duration_category)
            .unwrap_or_else(|| DurationCategory::classify(row.duration_seconds));
        Self {
            asset_id: row.asset_id,
            guid: row.guid,
            instance_id: row.instance_id,
            content_type: row.content_type,
            content_title: row.content_title,
            duration_seconds: row.duration_seconds,
            duration_category,
            engagement_score: row.engagement_score,
            theme: row.theme,
            meeting_date: row.meeting_date,
            file_name: row.file_name,
            file_path: row.file_path,
            encoded_date: row.encoded_date,
            last_scheduled_date: row.last_scheduled_date,
            total_airings: row.total_airings.unwrap_or(0),
            featured: row.featured.unwrap_or(false),
            content_expiry_date: row.content_expiry_date,
            go_live_date: row.go_live_date,
            delay_factor_used: 1.0,
            was_reset: false,
        }
    }
}

/// Parameters for one ranked candidate fetch.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub token: RotationToken,
    pub exclude_ids: Vec<i32>,
    pub schedule_date: NaiveDate,
    pub delay_reduction_factor: f64,
    pub ignore_delays: bool,
}

/// An item ready for persistence. `asset_id` is `None` for live-input
/// placeholders, whose title travels in `metadata`.
#[derive(Debug, Clone)]
pub struct NewScheduledItem {
    pub asset_id: Option<i32>,
    pub instance_id: Option<i32>,
    pub sequence_number: i32,
    pub scheduled_start_time: NaiveTime,
    pub scheduled_duration_seconds: f64,
    pub metadata: Option<serde_json::Value>,
}

/// An item placed during the current run, kept in memory for theme-conflict
/// scans and converted to [`NewScheduledItem`] at save time.
#[derive(Debug, Clone)]
pub struct PlacedItem {
    pub asset_id: i32,
    pub instance_id: Option<i32>,
    pub sequence_number: i32,
    /// Offset in seconds from schedule start.
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub content_type: String,
    pub theme: Option<String>,
    pub duration_category: DurationCategory,
    pub file_name: String,
    pub featured: bool,
}

impl PlacedItem {
    pub fn to_new_item(&self, multi_day: bool) -> NewScheduledItem {
        let mut fields = serde_json::Map::new();
        if multi_day {
            fields.insert(
                "day_offset".to_owned(),
                crate::scheduler::timing::day_offset(self.start_seconds).into(),
            );
        }
        if self.featured {
            fields.insert("featured".to_owned(), true.into());
        }
        let metadata = (!fields.is_empty()).then(|| serde_json::Value::Object(fields));
        NewScheduledItem {
            asset_id: Some(self.asset_id),
            instance_id: self.instance_id,
            sequence_number: self.sequence_number,
            scheduled_start_time: crate::scheduler::timing::time_of_day(self.start_seconds),
            scheduled_duration_seconds: self.duration_seconds,
            metadata,
        }
    }
}

/// Read/write access the builder needs. Each call may block on a database
/// round trip; nothing else in the core suspends.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Ranked candidates for a rotation token, ordered by composite
    /// priority, honoring expiry, go-live, availability, exclusions, and
    /// the (possibly reduced) replay-delay constraint.
    async fn available_content(&self, request: &ContentRequest) -> Result<Vec<Candidate>>;

    /// Featured-eligible candidates ordered by least-recently-scheduled then
    /// engagement. The auto-feature policy filter is applied by the caller.
    async fn featured_content(
        &self,
        exclude_ids: &[i32],
        schedule_date: NaiveDate,
    ) -> Result<Vec<Candidate>>;

    /// All valid asset ids in a category/type (expiry and go-live respected),
    /// used by the category-reset check.
    async fn category_asset_ids(
        &self,
        token: &RotationToken,
        schedule_date: NaiveDate,
    ) -> Result<Vec<i32>>;

    /// Clear `last_scheduled_date` for the given assets, making them
    /// immediately eligible again.
    async fn reset_category_delays(&self, asset_ids: &[i32]) -> Result<u64>;

    /// Upsert scheduling metadata: set `last_scheduled_date`, increment
    /// `total_airings`.
    async fn mark_asset_scheduled(&self, asset_id: i32, air_time: DateTime<Utc>) -> Result<()>;

    async fn find_schedule_by_date(&self, air_date: NaiveDate) -> Result<Option<i32>>;

    async fn create_schedule(&self, name: &str, air_date: NaiveDate) -> Result<i32>;

    async fn save_items(&self, schedule_id: i32, items: &[NewScheduledItem]) -> Result<usize>;

    async fn update_schedule_duration(&self, schedule_id: i32, total_seconds: f64) -> Result<()>;

    /// Delete a schedule, decrementing `total_airings` for every referenced
    /// asset by its in-schedule count. Returns false when absent.
    async fn delete_schedule(&self, schedule_id: i32) -> Result<bool>;

    /// Materialize per-day greeting pools for the schedule window.
    async fn assign_holiday_pools(&self, start_date: NaiveDate, num_days: u32) -> Result<usize>;

    /// The greeting pool assigned to a date, in stable order.
    async fn holiday_pool_for_date(&self, date: NaiveDate) -> Result<Vec<Candidate>>;

    /// Bump `scheduled_count` / `last_scheduled` for a placed greeting.
    async fn record_holiday_play(&self, asset_id: i32) -> Result<()>;
}

/// Production store backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    config: Arc<SchedulingConfig>,
}

impl PgStore {
    pub fn new(pool: PgPool, config: Arc<SchedulingConfig>) -> Self {
        Self { pool, config }
    }

    fn compare_date(schedule_date: NaiveDate) -> DateTime<Utc> {
        schedule_date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc()
    }
}

#[async_trait]
impl SchedulerStore for PgStore {
    async fn available_content(&self, request: &ContentRequest) -> Result<Vec<Candidate>> {
        let factor = request.delay_reduction_factor;
        let query = data::assets::ContentQuery {
            token: &request.token,
            exclude_ids: &request.exclude_ids,
            compare_date: Self::compare_date(request.schedule_date),
            base_delay_hours: self.config.base_delay_hours(&request.token) * factor,
            additional_delay_hours: self.config.additional_delay_hours(&request.token) * factor,
            featured_delay_hours: self.config.featured_content.minimum_spacing_hours,
            ignore_delays: request.ignore_delays || factor <= 0.0,
        };
        let rows = data::assets::available_content(&self.pool, &query).await?;
        Ok(rows.into_iter().map(Candidate::from).collect())
    }

    async fn featured_content(
        &self,
        exclude_ids: &[i32],
        schedule_date: NaiveDate,
    ) -> Result<Vec<Candidate>> {
        let rows = data::assets::featured_content(
            &self.pool,
            &self.config.featurable_types(),
            exclude_ids,
            Self::compare_date(schedule_date),
        )
        .await?;
        Ok(rows.into_iter().map(Candidate::from).collect())
    }

    async fn category_asset_ids(
        &self,
        token: &RotationToken,
        schedule_date: NaiveDate,
    ) -> Result<Vec<i32>> {
        Ok(data::assets::category_asset_ids(
            &self.pool,
            token,
            Self::compare_date(schedule_date),
        )
        .await?)
    }

    async fn reset_category_delays(&self, asset_ids: &[i32]) -> Result<u64> {
        Ok(data::assets::reset_category_delays(&self.pool, asset_ids).await?)
    }

    async fn mark_asset_scheduled(&self, asset_id: i32, air_time: DateTime<Utc>) -> Result<()> {
        Ok(data::assets::mark_asset_scheduled(&self.pool, asset_id, air_time).await?)
    }

    async fn find_schedule_by_date(&self, air_date: NaiveDate) -> Result<Option<i32>> {
        Ok(data::schedules::find_by_date(&self.pool, air_date).await?)
    }

    async fn create_schedule(&self, name: &str, air_date: NaiveDate) -> Result<i32> {
        Ok(data::schedules::create(&self.pool, name, air_date).await?)
    }

    async fn save_items(&self, schedule_id: i32, items: &[NewScheduledItem]) -> Result<usize> {
        Ok(data::schedules::save_items(&self.pool, schedule_id, items).await?)
    }

    async fn update_schedule_duration(&self, schedule_id: i32, total_seconds: f64) -> Result<()> {
        Ok(data::schedules::update_duration(&self.pool, schedule_id, total_seconds).await?)
    }

    async fn delete_schedule(&self, schedule_id: i32) -> Result<bool> {
        Ok(data::schedules::delete(&self.pool, schedule_id).await?)
    }

    async fn assign_holiday_pools(&self, start_date: NaiveDate, num_days: u32) -> Result<usize> {
        Ok(data::holiday::assign_pools(&self.pool, start_date, num_days).await?)
    }

    async fn holiday_pool_for_date(&self, date: NaiveDate) -> Result<Vec<Candidate>> {
        let rows = data::holiday::pool_for_date(&self.pool, date).await?;
        Ok(rows.into_iter().map(Candidate::from).collect())
    }

    async fn record_holiday_play(&self, asset_id: i32) -> Result<()> {
        Ok(data::holiday::record_play(&self.pool, asset_id).await?)
    }
}
