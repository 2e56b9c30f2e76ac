//! Candidate retrieval with progressive delay relaxation.
//!
//! Each request walks the reduction sequence 1.0 -> 0.75 -> 0.5 -> 0.25 ->
//! 0.0 and returns the first non-empty set. When every step comes back
//! empty, the category-reset safety valve clears `last_scheduled_date` for
//! the blocked assets and retries once with delays ignored.

use crate::scheduler::holiday::HolidayRotator;
use crate::scheduler::rotation::RotationToken;
use crate::scheduler::store::{Candidate, ContentRequest, SchedulerStore};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

const DELAY_FACTORS: [f64; 5] = [1.0, 0.75, 0.5, 0.25, 0.0];

/// Exclusion fraction of a category's valid set at which a reset is allowed
/// even when not everything is excluded.
const RESET_EXCLUSION_RATIO: f64 = 0.25;

/// One candidate fetch round.
#[derive(Debug, Default)]
pub struct CandidateBatch {
    pub candidates: Vec<Candidate>,
    /// True when the category-reset valve fired for this batch.
    pub reset_occurred: bool,
}

/// Fetch candidates for a rotation token, relaxing delays progressively and
/// falling back to a category reset. On reset, the category's assets are
/// removed from `exclude_ids` so they may be scheduled again within the run.
///
/// When the holiday rotator is enabled, greetings are stripped from
/// duration-category pools: they only reach schedules through the rotator's
/// own per-day selection.
pub async fn content_with_progressive_delays(
    store: &dyn SchedulerStore,
    token: &RotationToken,
    exclude_ids: &mut Vec<i32>,
    schedule_date: NaiveDate,
    holiday: &HolidayRotator,
) -> anyhow::Result<CandidateBatch> {
    for factor in DELAY_FACTORS {
        let request = ContentRequest {
            token: token.clone(),
            exclude_ids: exclude_ids.clone(),
            schedule_date,
            delay_reduction_factor: factor,
            ignore_delays: factor == 0.0,
        };
        let mut candidates = store.available_content(&request).await?;
        if candidates.is_empty() {
            continue;
        }

        if factor == 0.0 {
            warn!(
                token = %token,
                count = candidates.len(),
                "Found content with NO delay restrictions - schedule quality may be impacted"
            );
        } else if factor < 1.0 {
            warn!(
                token = %token,
                count = candidates.len(),
                factor,
                "Found content with reduced delay requirements"
            );
        }

        for candidate in &mut candidates {
            candidate.delay_factor_used = factor;
        }

        strip_greetings(holiday, token, &mut candidates);

        return Ok(CandidateBatch {
            candidates,
            reset_occurred: false,
        });
    }

    // Nothing at any factor: decide whether the category has simply been
    // exhausted by this run's exclusions.
    error!(token = %token, "No content available even with all delay restrictions removed");

    let valid_ids: HashSet<i32> = store
        .category_asset_ids(token, schedule_date)
        .await?
        .into_iter()
        .collect();
    if valid_ids.is_empty() {
        error!(token = %token, "No valid content in library (all expired or not analyzed)");
        return Ok(CandidateBatch::default());
    }

    let excluded: Vec<i32> = exclude_ids
        .iter()
        .copied()
        .filter(|id| valid_ids.contains(id))
        .collect();
    let exclusion_ratio = excluded.len() as f64 / valid_ids.len() as f64;
    let should_reset = !excluded.is_empty()
        && (excluded.len() == valid_ids.len() || exclusion_ratio >= RESET_EXCLUSION_RATIO);

    if !should_reset {
        return Ok(CandidateBatch::default());
    }

    warn!(
        token = %token,
        excluded = excluded.len(),
        valid = valid_ids.len(),
        "Resetting category exclusions and delays to allow reuse"
    );

    let cleared = store.reset_category_delays(&excluded).await?;
    info!(token = %token, cleared, "Reset last_scheduled_date for category assets");

    let excluded_set: HashSet<i32> = excluded.iter().copied().collect();
    exclude_ids.retain(|id| !excluded_set.contains(id));

    let request = ContentRequest {
        token: token.clone(),
        exclude_ids: exclude_ids.clone(),
        schedule_date,
        delay_reduction_factor: 0.0,
        ignore_delays: true,
    };
    let mut candidates = store.available_content(&request).await?;
    if candidates.is_empty() {
        error!(token = %token, "Still no content available after category reset");
        return Ok(CandidateBatch::default());
    }

    for candidate in &mut candidates {
        candidate.delay_factor_used = 0.0;
        candidate.was_reset = true;
    }

    strip_greetings(holiday, token, &mut candidates);

    Ok(CandidateBatch {
        candidates,
        reset_occurred: true,
    })
}

/// Greetings never enter ordinary duration-category pools while the rotator
/// is enabled. Content-type rotation requests are left untouched.
fn strip_greetings(holiday: &HolidayRotator, token: &RotationToken, candidates: &mut Vec<Candidate>) {
    if token.category().is_none() {
        return;
    }
    let stripped = holiday.strip_greetings(candidates);
    if stripped > 0 {
        debug!(stripped, token = %token, "Removed holiday greetings from candidate pool");
    }
}
