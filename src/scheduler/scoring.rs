//! Candidate scoring for slot selection.
//!
//! The store returns candidates pre-ranked by composite priority; this module
//! re-scores them locally against the state of the run being built: fatigue
//! from recent plays, station-ID rotation rules, content-type replay
//! pressure, and theme separation.

use crate::config::SchedulingConfig;
use crate::scheduler::rotation::{DurationCategory, RotationToken};
use crate::scheduler::store::{Candidate, PlacedItem};
use std::collections::HashMap;

/// Base score before adjustments.
const BASE_SCORE: f64 = 100.0;
/// Boost for featured candidates.
const FEATURED_BOOST: f64 = 150.0;
/// Penalty for a theme conflict (short-form repetition without a long-form
/// separator).
const THEME_CONFLICT_PENALTY: f64 = 400.0;
/// Remaining-window threshold below which theme conflicts are waived so the
/// tail of the day can close.
const THEME_WAIVER_HOURS: f64 = 2.0;

/// Everything the scorer needs about the run in progress.
pub struct ScoreParams<'a> {
    /// Current position, seconds from schedule start.
    pub position_seconds: f64,
    /// Hours remaining in the current day's window.
    pub remaining_hours: f64,
    /// The rotation token this slot was requested for.
    pub requested: &'a RotationToken,
    /// Asset id -> placement positions (seconds) within this run.
    pub recent_plays: &'a HashMap<i32, Vec<f64>>,
    pub scheduled_items: &'a [PlacedItem],
    pub config: &'a SchedulingConfig,
}

/// Score a candidate. `jitter` is a small uniform random component supplied
/// by the caller to break ties between similar content.
pub fn score_candidate(candidate: &Candidate, params: &ScoreParams<'_>, jitter: f64) -> f64 {
    let mut score = BASE_SCORE + jitter;

    if candidate.featured {
        score += FEATURED_BOOST;
    }

    let plays = params.recent_plays.get(&candidate.asset_id);

    // Fatigue by recency of every prior play in this run.
    if let Some(plays) = plays {
        for play_position in plays {
            let gap_hours = (params.position_seconds - play_position) / 3600.0;
            if gap_hours < 1.0 {
                score -= 100.0;
            } else if gap_hours < 2.0 {
                score -= 50.0;
            } else if gap_hours < 4.0 {
                score -= 25.0;
            } else if gap_hours < 6.0 {
                score -= 10.0;
            }
        }
        if plays.len() >= 3 {
            score -= 50.0 * (plays.len() as f64 - 2.0);
        }
    }

    // The requested token decides which replay-pressure path applies; the two
    // never stack for one evaluation.
    match params.requested {
        RotationToken::ContentType(_) => {
            match plays {
                Some(plays) if !plays.is_empty() => {
                    let last_play = plays[plays.len() - 1];
                    let gap_hours = (params.position_seconds - last_play) / 3600.0;
                    let min_delay = params.config.content_type_min_delay(&candidate.content_type);
                    if gap_hours < min_delay {
                        score -= 200.0 * (min_delay - gap_hours) / min_delay;
                    }
                    if plays.len() >= 2 {
                        score -= 30.0 * (plays.len() as f64 - 1.0);
                    }
                }
                _ => score += 30.0,
            }
        }
        RotationToken::Category(_) => {
            if candidate.duration_category == DurationCategory::Id {
                match plays {
                    Some(plays) if !plays.is_empty() => {
                        let last_play = plays[plays.len() - 1];
                        let gap_hours = (params.position_seconds - last_play) / 3600.0;
                        if gap_hours < 2.0 {
                            score -= 300.0;
                        }
                        if plays.len() >= 2 {
                            score -= 50.0 * (plays.len() as f64 - 1.0);
                        }
                    }
                    _ => score += 50.0,
                }
            }
        }
    }

    if has_theme_conflict(candidate, params.scheduled_items, Some(params.remaining_hours)) {
        score -= THEME_CONFLICT_PENALTY;
    }

    score
}

/// Short-form theme separation: two short-form items (id / spots /
/// short_form) sharing a theme must have at least one long_form item between
/// them. Scanning backward from the end of the run, a long_form item clears
/// the candidate; a same-theme short-form item first is a conflict.
///
/// Waived inside the last two hours of the window so the tail can close.
pub fn has_theme_conflict(
    candidate: &Candidate,
    scheduled_items: &[PlacedItem],
    remaining_hours: Option<f64>,
) -> bool {
    if !candidate.duration_category.is_short_form() {
        return false;
    }
    let Some(theme) = candidate.theme.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return false;
    };
    if scheduled_items.is_empty() {
        return false;
    }
    if let Some(remaining) = remaining_hours
        && remaining < THEME_WAIVER_HOURS
    {
        return false;
    }

    for item in scheduled_items.iter().rev() {
        if item.duration_category == DurationCategory::LongForm {
            return false;
        }
        if item.duration_category.is_short_form()
            && let Some(item_theme) = item.theme.as_deref()
            && item_theme.eq_ignore_ascii_case(theme)
        {
            return true;
        }
    }

    false
}
