//! In-memory [`SchedulerStore`] used to drive the builder in tests.
//!
//! Mirrors the production store's contract: hard filters, the replay-delay
//! rule, and the composite priority ordering -- minus the random tie-break,
//! so runs are reproducible.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use playout::config::SchedulingConfig;
use playout::scheduler::rotation::{DurationCategory, RotationToken};
use playout::scheduler::store::{Candidate, ContentRequest, NewScheduledItem, SchedulerStore};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

const POOL_SIZE: usize = 4;

/// A library asset plus its mutable scheduling state.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub candidate: Candidate,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct FakeSchedule {
    pub name: String,
    pub air_date: NaiveDate,
    pub items: Vec<NewScheduledItem>,
    pub total_duration: f64,
}

#[derive(Default)]
struct Inner {
    assets: Vec<AssetRecord>,
    schedules: HashMap<i32, FakeSchedule>,
    next_schedule_id: i32,
    holiday_pools: HashMap<NaiveDate, Vec<i32>>,
    greeting_plays: HashMap<i32, i32>,
}

pub struct InMemoryStore {
    config: SchedulingConfig,
    inner: Mutex<Inner>,
}

/// Chainable test asset builder.
pub fn asset(asset_id: i32, category: DurationCategory, duration_seconds: f64) -> Candidate {
    Candidate {
        asset_id,
        guid: uuid::Uuid::new_v4(),
        instance_id: Some(asset_id),
        content_type: "PSA".to_owned(),
        content_title: format!("Asset {asset_id}"),
        duration_seconds,
        duration_category: category,
        engagement_score: Some(50),
        theme: None,
        meeting_date: None,
        file_name: format!("asset_{asset_id}.mp4"),
        file_path: format!("/media/asset_{asset_id}.mp4"),
        encoded_date: None,
        last_scheduled_date: None,
        total_airings: 0,
        featured: false,
        content_expiry_date: None,
        go_live_date: None,
        delay_factor_used: 1.0,
        was_reset: false,
    }
}

pub fn with_theme(mut c: Candidate, theme: &str) -> Candidate {
    c.theme = Some(theme.to_owned());
    c
}

pub fn with_type(mut c: Candidate, content_type: &str) -> Candidate {
    c.content_type = content_type.to_owned();
    c
}

pub fn with_name(mut c: Candidate, file_name: &str, title: &str) -> Candidate {
    c.file_name = file_name.to_owned();
    c.content_title = title.to_owned();
    c
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn is_greeting_named(c: &Candidate) -> bool {
    playout::scheduler::holiday::is_holiday_greeting(&c.file_name, Some(&c.content_title))
}

impl InMemoryStore {
    pub fn new(config: SchedulingConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                next_schedule_id: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn add(&self, candidate: Candidate) {
        self.inner.lock().unwrap().assets.push(AssetRecord {
            candidate,
            available: true,
        });
    }

    pub fn schedule(&self, schedule_id: i32) -> Option<FakeSchedule> {
        self.inner.lock().unwrap().schedules.get(&schedule_id).cloned()
    }

    pub fn schedule_count(&self) -> usize {
        self.inner.lock().unwrap().schedules.len()
    }

    pub fn airings(&self, asset_id: i32) -> i32 {
        self.inner
            .lock()
            .unwrap()
            .assets
            .iter()
            .find(|a| a.candidate.asset_id == asset_id)
            .map(|a| a.candidate.total_airings)
            .unwrap_or(0)
    }

    pub fn greeting_plays(&self, asset_id: i32) -> i32 {
        *self.inner.lock().unwrap().greeting_plays.get(&asset_id).unwrap_or(&0)
    }

    pub fn pool_ids_for(&self, date: NaiveDate) -> Vec<i32> {
        self.inner
            .lock()
            .unwrap()
            .holiday_pools
            .get(&date)
            .cloned()
            .unwrap_or_default()
    }

    fn matches_token(candidate: &Candidate, token: &RotationToken) -> bool {
        match token {
            RotationToken::Category(category) => candidate.duration_category == *category,
            RotationToken::ContentType(ty) => candidate.content_type.to_lowercase() == *ty,
        }
    }

    fn window_eligible(record: &AssetRecord, compare: DateTime<Utc>) -> bool {
        let c = &record.candidate;
        record.available
            && !c.file_path.contains("FILL")
            && c.content_expiry_date.is_none_or(|expiry| expiry > compare)
            && c.go_live_date.is_none_or(|live| live <= compare)
    }

    fn delay_eligible(&self, c: &Candidate, request: &ContentRequest, compare: DateTime<Utc>) -> bool {
        if request.ignore_delays || request.delay_reduction_factor <= 0.0 {
            return true;
        }
        let Some(last) = c.last_scheduled_date else {
            return true;
        };
        if last > compare {
            // Scheduled in the future relative to the build date.
            return true;
        }
        let hours_since = (compare - last).num_seconds() as f64 / 3600.0;
        let required = if c.featured {
            self.config.featured_content.minimum_spacing_hours
        } else {
            let factor = request.delay_reduction_factor;
            self.config.base_delay_hours(&request.token) * factor
                + c.total_airings as f64
                    * self.config.additional_delay_hours(&request.token)
                    * factor
        };
        hours_since >= required
    }

    fn composite_priority(c: &Candidate, compare: DateTime<Utc>) -> f64 {
        let freshness = match c.encoded_date {
            None => 0.0,
            Some(encoded) => {
                if encoded >= compare {
                    100.0
                } else if encoded >= compare - chrono::Duration::days(1) {
                    90.0
                } else if encoded >= compare - chrono::Duration::days(3) {
                    80.0
                } else if encoded >= compare - chrono::Duration::days(7) {
                    60.0
                } else if encoded >= compare - chrono::Duration::days(14) {
                    40.0
                } else if encoded >= compare - chrono::Duration::days(30) {
                    20.0
                } else {
                    10.0
                }
            }
        };
        let engagement = c.engagement_score.unwrap_or(50) as f64;
        let airings_score = match c.total_airings {
            0 => 100.0,
            1..=2 => 80.0,
            3..=5 => 60.0,
            6..=10 => 40.0,
            11..=20 => 20.0,
            _ => 10.0,
        };
        let recency = match c.last_scheduled_date {
            None => 100.0,
            Some(last) => {
                let hours = (compare - last).num_seconds() as f64 / 3600.0;
                if hours >= 24.0 {
                    100.0
                } else if hours >= 12.0 {
                    80.0
                } else if hours >= 6.0 {
                    60.0
                } else if hours >= 3.0 {
                    40.0
                } else if hours >= 1.0 {
                    20.0
                } else {
                    0.0
                }
            }
        };
        freshness * 0.35 + engagement * 0.25 + airings_score * 0.20 + recency * 0.20
    }

    fn rank(pool: &mut Vec<Candidate>, compare: DateTime<Utc>) {
        pool.sort_by(|a, b| {
            let pa = Self::composite_priority(a, compare);
            let pb = Self::composite_priority(b, compare);
            pb.partial_cmp(&pa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| match (a.last_scheduled_date, b.last_scheduled_date) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
                .then_with(|| a.total_airings.cmp(&b.total_airings))
                .then_with(|| match (a.encoded_date, b.encoded_date) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) => y.cmp(&x),
                })
                .then_with(|| a.asset_id.cmp(&b.asset_id))
        });
        pool.truncate(200);
    }
}

#[async_trait]
impl SchedulerStore for InMemoryStore {
    async fn available_content(&self, request: &ContentRequest) -> anyhow::Result<Vec<Candidate>> {
        let compare = midnight(request.schedule_date);
        let inner = self.inner.lock().unwrap();
        let mut pool: Vec<Candidate> = inner
            .assets
            .iter()
            .filter(|record| {
                Self::matches_token(&record.candidate, &request.token)
                    && Self::window_eligible(record, compare)
                    && !request.exclude_ids.contains(&record.candidate.asset_id)
                    && self.delay_eligible(&record.candidate, request, compare)
            })
            .map(|record| record.candidate.clone())
            .collect();
        Self::rank(&mut pool, compare);
        Ok(pool)
    }

    async fn featured_content(
        &self,
        exclude_ids: &[i32],
        schedule_date: NaiveDate,
    ) -> anyhow::Result<Vec<Candidate>> {
        let compare = midnight(schedule_date);
        let featurable: Vec<String> = self
            .config
            .featurable_types()
            .iter()
            .map(|t| t.to_uppercase())
            .collect();
        let inner = self.inner.lock().unwrap();
        let mut pool: Vec<Candidate> = inner
            .assets
            .iter()
            .filter(|record| {
                let c = &record.candidate;
                Self::window_eligible(record, compare)
                    && !exclude_ids.contains(&c.asset_id)
                    && (c.featured || featurable.contains(&c.content_type.to_uppercase()))
            })
            .map(|record| record.candidate.clone())
            .collect();
        pool.sort_by(|a, b| {
            match (a.last_scheduled_date, b.last_scheduled_date) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            }
            .then_with(|| b.engagement_score.unwrap_or(0).cmp(&a.engagement_score.unwrap_or(0)))
            .then_with(|| a.asset_id.cmp(&b.asset_id))
        });
        Ok(pool)
    }

    async fn category_asset_ids(
        &self,
        token: &RotationToken,
        schedule_date: NaiveDate,
    ) -> anyhow::Result<Vec<i32>> {
        let compare = midnight(schedule_date);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .assets
            .iter()
            .filter(|record| {
                let c = &record.candidate;
                Self::matches_token(c, token)
                    && c.content_expiry_date.is_none_or(|expiry| expiry > compare)
                    && c.go_live_date.is_none_or(|live| live <= compare)
            })
            .map(|record| record.candidate.asset_id)
            .collect())
    }

    async fn reset_category_delays(&self, asset_ids: &[i32]) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut cleared = 0u64;
        for record in &mut inner.assets {
            if asset_ids.contains(&record.candidate.asset_id) {
                record.candidate.last_scheduled_date = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn mark_asset_scheduled(&self, asset_id: i32, air_time: DateTime<Utc>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.assets.iter_mut().find(|a| a.candidate.asset_id == asset_id) {
            record.candidate.last_scheduled_date = Some(air_time);
            record.candidate.total_airings += 1;
        }
        Ok(())
    }

    async fn find_schedule_by_date(&self, air_date: NaiveDate) -> anyhow::Result<Option<i32>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .schedules
            .iter()
            .find(|(_, s)| s.air_date == air_date)
            .map(|(id, _)| *id))
    }

    async fn create_schedule(&self, name: &str, air_date: NaiveDate) -> anyhow::Result<i32> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_schedule_id;
        inner.next_schedule_id += 1;
        inner.schedules.insert(
            id,
            FakeSchedule {
                name: name.to_owned(),
                air_date,
                items: Vec::new(),
                total_duration: 0.0,
            },
        );
        Ok(id)
    }

    async fn save_items(&self, schedule_id: i32, items: &[NewScheduledItem]) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let schedule = inner
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| anyhow::anyhow!("no schedule {schedule_id}"))?;
        schedule.items = items.to_vec();
        Ok(items.len())
    }

    async fn update_schedule_duration(&self, schedule_id: i32, total_seconds: f64) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(schedule) = inner.schedules.get_mut(&schedule_id) {
            schedule.total_duration = total_seconds;
        }
        Ok(())
    }

    async fn delete_schedule(&self, schedule_id: i32) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(schedule) = inner.schedules.remove(&schedule_id) else {
            return Ok(false);
        };
        let mut counts: HashMap<i32, i32> = HashMap::new();
        for item in &schedule.items {
            if let Some(asset_id) = item.asset_id {
                *counts.entry(asset_id).or_default() += 1;
            }
        }
        for record in &mut inner.assets {
            if let Some(count) = counts.get(&record.candidate.asset_id) {
                record.candidate.total_airings = (record.candidate.total_airings - count).max(0);
            }
        }
        Ok(true)
    }

    async fn assign_holiday_pools(&self, start_date: NaiveDate, num_days: u32) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let mut roster: Vec<(i32, String)> = inner
            .assets
            .iter()
            .filter(|record| {
                record.available
                    && record.candidate.duration_category == DurationCategory::Spots
                    && is_greeting_named(&record.candidate)
            })
            .map(|record| (record.candidate.asset_id, record.candidate.file_name.clone()))
            .collect();
        if roster.is_empty() {
            return Ok(0);
        }
        roster.sort_by(|a, b| a.1.cmp(&b.1));

        let per_day = POOL_SIZE.min(roster.len());
        let mut usage: Vec<(i32, u32)> = roster.iter().map(|(id, _)| (*id, 0u32)).collect();
        let mut written = 0usize;
        for day in 0..num_days {
            let date = start_date + Days::new(day as u64);
            usage.sort_by_key(|(_, count)| *count);
            let mut pool: Vec<i32> = usage[..per_day].iter().map(|(id, _)| *id).collect();
            pool.sort_unstable();
            for slot in 0..per_day {
                usage[slot].1 += 1;
            }
            written += pool.len();
            inner.holiday_pools.insert(date, pool);
        }
        Ok(written)
    }

    async fn holiday_pool_for_date(&self, date: NaiveDate) -> anyhow::Result<Vec<Candidate>> {
        let compare = midnight(date);
        let inner = self.inner.lock().unwrap();
        let Some(pool_ids) = inner.holiday_pools.get(&date) else {
            return Ok(Vec::new());
        };
        Ok(pool_ids
            .iter()
            .filter_map(|id| {
                inner
                    .assets
                    .iter()
                    .find(|a| a.candidate.asset_id == *id)
                    .filter(|a| {
                        a.available
                            && a.candidate
                                .content_expiry_date
                                .is_none_or(|expiry| expiry > compare)
                    })
                    .map(|a| a.candidate.clone())
            })
            .collect())
    }

    async fn record_holiday_play(&self, asset_id: i32) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.greeting_plays.entry(asset_id).or_default() += 1;
        Ok(())
    }
}
