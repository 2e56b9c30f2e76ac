//! Featured-content placement policy.
//!
//! Featured items bypass the rotation, subject to a minimum spacing and a
//! probabilistic daytime bias. Eligibility combines per-type config
//! (always-featured, engagement threshold, meeting age) with the manual
//! `featured` flag.

use crate::config::{FeaturedContentConfig, MeetingRelevanceConfig, SchedulingConfig};
use crate::scheduler::store::Candidate;
use crate::scheduler::timing::DAY_SECONDS;
use chrono::NaiveDate;
use rand::Rng;

/// Relevance of a meeting recording relative to the schedule date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceTier {
    /// Meeting hasn't happened yet.
    Future,
    Fresh,
    Relevant,
    Archive,
    Expired,
}

impl RelevanceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Future => "future",
            Self::Fresh => "fresh",
            Self::Relevant => "relevant",
            Self::Archive => "archive",
            Self::Expired => "expired",
        }
    }
}

/// Tier for a meeting aged `schedule_date - meeting_date` days.
pub fn meeting_relevance_tier(
    meeting_date: NaiveDate,
    schedule_date: NaiveDate,
    config: &MeetingRelevanceConfig,
) -> RelevanceTier {
    let days_old = (schedule_date - meeting_date).num_days();
    if days_old < 0 {
        RelevanceTier::Future
    } else if days_old <= config.fresh_days {
        RelevanceTier::Fresh
    } else if days_old <= config.relevant_days {
        RelevanceTier::Relevant
    } else if days_old <= config.archive_days {
        RelevanceTier::Archive
    } else {
        RelevanceTier::Expired
    }
}

/// Whether a candidate qualifies as featured for the given schedule date.
pub fn should_auto_feature(
    candidate: &Candidate,
    schedule_date: NaiveDate,
    config: &SchedulingConfig,
) -> bool {
    let type_config = config.priority_for(&candidate.content_type);

    if let Some(type_config) = type_config {
        if type_config.always_featured {
            return true;
        }

        // Meeting recordings stay featured while fresh or relevant.
        if candidate.content_type.eq_ignore_ascii_case("MTG") && type_config.auto_feature_days > 0 {
            let meeting_date = candidate
                .meeting_date
                .or_else(|| candidate.encoded_date.map(|d| d.date_naive()));
            if let Some(meeting_date) = meeting_date {
                let tier =
                    meeting_relevance_tier(meeting_date, schedule_date, &config.meeting_relevance);
                if matches!(tier, RelevanceTier::Fresh | RelevanceTier::Relevant) {
                    return true;
                }
            }
        }

        if type_config.engagement_based
            && candidate.engagement_score.unwrap_or(0) >= type_config.feature_threshold
        {
            return true;
        }
    }

    candidate.featured
}

/// Whether the minimum spacing since the last featured placement is met.
pub fn spacing_satisfied(
    position_seconds: f64,
    last_featured_seconds: f64,
    config: &FeaturedContentConfig,
) -> bool {
    position_seconds - last_featured_seconds >= config.minimum_spacing_hours * 3600.0
}

/// Whether a position falls inside the configured daytime window.
pub fn is_daytime_slot(position_seconds: f64, config: &FeaturedContentConfig) -> bool {
    let hour_of_day = (position_seconds / 3600.0) % (DAY_SECONDS / 3600.0);
    (config.daytime_hours.start as f64) <= hour_of_day
        && hour_of_day < config.daytime_hours.end as f64
}

/// Probabilistic daytime bias: inside daytime prefer featured with
/// probability `p`, outside with `1 - p`.
pub fn prefers_featured_slot<R: Rng>(
    rng: &mut R,
    position_seconds: f64,
    config: &FeaturedContentConfig,
) -> bool {
    let draw: f64 = rng.random();
    if is_daytime_slot(position_seconds, config) {
        draw < config.daytime_probability
    } else {
        draw < 1.0 - config.daytime_probability
    }
}

/// Round-robin cursor over the featured list, persisting across slots.
#[derive(Debug, Default)]
pub struct FeaturedCycle {
    index: usize,
}

impl FeaturedCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next featured item, advancing the cursor modulo list length.
    pub fn next<'a>(&mut self, list: &'a [Candidate]) -> Option<&'a Candidate> {
        if list.is_empty() {
            return None;
        }
        let selected = &list[self.index % list.len()];
        self.index += 1;
        Some(selected)
    }
}
