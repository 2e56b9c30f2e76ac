//! Holiday-greeting fair rotation.
//!
//! Greetings are a small curated class the station wants spread widely and
//! evenly. They are recognized dynamically by name, pulled out of ordinary
//! candidate pools, and emitted one at a time from a pre-assigned per-day
//! pool, round-robin, never back-to-back.

use crate::scheduler::store::{Candidate, SchedulerStore};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static GREETING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)holiday\s*greeting").expect("valid regex"));

/// Reserved theme marking a placed greeting; drives back-to-back prevention.
pub const HOLIDAY_THEME: &str = "HolidayGreeting";

/// Whether a content item is a holiday greeting, by file name or title.
pub fn is_holiday_greeting(file_name: &str, content_title: Option<&str>) -> bool {
    if GREETING_PATTERN.is_match(file_name) {
        return true;
    }
    content_title.is_some_and(|title| GREETING_PATTERN.is_match(title))
}

/// Per-run rotator over the date-assigned greeting pools.
///
/// Pools are loaded lazily per date and cached for the run; the cursor
/// round-robins within each date's pool.
pub struct HolidayRotator {
    enabled: bool,
    pools: HashMap<NaiveDate, Vec<Candidate>>,
    cursors: HashMap<NaiveDate, usize>,
}

impl HolidayRotator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pools: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Remove every greeting from a candidate pool, returning how many were
    /// stripped. When the rotator is enabled, greetings only enter schedules
    /// through it.
    pub fn strip_greetings(&self, pool: &mut Vec<Candidate>) -> usize {
        if !self.enabled {
            return 0;
        }
        let before = pool.len();
        pool.retain(|c| !is_holiday_greeting(&c.file_name, Some(&c.content_title)));
        before - pool.len()
    }

    /// The next greeting for a schedule date, or `None` when the rotator is
    /// disabled, the previous item was itself a greeting, or the date's pool
    /// is empty / fully expired.
    pub async fn next_greeting(
        &mut self,
        store: &dyn SchedulerStore,
        date: NaiveDate,
        last_scheduled_theme: Option<&str>,
    ) -> anyhow::Result<Option<Candidate>> {
        if !self.enabled {
            return Ok(None);
        }

        // Back-to-back prevention: never follow a greeting with a greeting.
        if last_scheduled_theme.is_some_and(|t| t.eq_ignore_ascii_case(HOLIDAY_THEME)) {
            return Ok(None);
        }

        if !self.pools.contains_key(&date) {
            let pool = store.holiday_pool_for_date(date).await?;
            tracing::debug!(date = %date, pool_size = pool.len(), "Loaded holiday greeting pool");
            self.pools.insert(date, pool);
            self.cursors.insert(date, 0);
        }
        let pool = self.pools.get(&date).expect("pool just inserted");
        if pool.is_empty() {
            return Ok(None);
        }

        let cursor = self.cursors.entry(date).or_insert(0);
        let expiry_cutoff = date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc();
        for _ in 0..pool.len() {
            let greeting = &pool[*cursor % pool.len()];
            *cursor += 1;
            let expired = greeting
                .content_expiry_date
                .is_some_and(|expiry| expiry <= expiry_cutoff);
            if !expired {
                return Ok(Some(greeting.clone()));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_predicate() {
        assert!(is_holiday_greeting("Holiday Greeting - Mayor.mp4", None));
        assert!(is_holiday_greeting("HOLIDAYGREETING_fire_dept.mp4", None));
        assert!(is_holiday_greeting("holiday  greeting 2026.mov", None));
        assert!(is_holiday_greeting("251201_spot.mp4", Some("City Council Holiday Greeting")));
        assert!(!is_holiday_greeting("spot_greeting.mp4", None));
        assert!(!is_holiday_greeting("holiday_parade.mp4", Some("Holiday Parade")));
    }

    #[test]
    fn test_strip_greetings_disabled_is_noop() {
        let rotator = HolidayRotator::new(false);
        let mut pool = Vec::new();
        assert_eq!(rotator.strip_greetings(&mut pool), 0);
    }
}
