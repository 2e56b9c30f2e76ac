//! The schedule builder.
//!
//! One builder run owns the whole state machine for a daily, weekly, or
//! monthly build: it walks the rotation, fetches and scores candidates,
//! places items with frame-accurate timing, and terminates cleanly. All
//! failures roll the schedule row back so a schedule is either complete or
//! absent.

use crate::config::SchedulingConfig;
use crate::scheduler::candidates::content_with_progressive_delays;
use crate::scheduler::error::{BuildErrorKind, BuildFailure, BuildSummary, DelayReductionStats};
use crate::scheduler::featured::{
    FeaturedCycle, is_daytime_slot, prefers_featured_slot, should_auto_feature, spacing_satisfied,
};
use crate::scheduler::holiday::{HOLIDAY_THEME, HolidayRotator, is_holiday_greeting};
use crate::scheduler::rotation::{DurationCategory, RotationController, RotationToken};
use crate::scheduler::scoring::{ScoreParams, has_theme_conflict, score_candidate};
use crate::scheduler::store::{Candidate, PlacedItem, SchedulerStore};
use crate::scheduler::timing::{DAY_SECONDS, FRAME_GAP_SECONDS};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Iterations without any forward progress before the run is declared stuck.
const MAX_NO_PROGRESS_ITERATIONS: u32 = 50;
/// Full rotation cycles without a placement before the run is declared stuck.
const MAX_NO_CONTENT_CYCLES: u32 = 3;
/// Remaining window below which a stuck tail is accepted as a gap (hours).
const TAIL_GAP_HOURS: f64 = 0.5;
/// Remaining window below which long_form requests are skipped (hours).
const LONG_FORM_CUTOFF_HOURS: f64 = 1.0;
/// A day must close at least this full, unless only a tail is missing.
const DAY_COMPLETION_MINIMUM: f64 = 0.95;
/// Hours placed above which an under-filled day is a tail gap, not a failure.
const DAY_TAIL_MINIMUM_HOURS: f64 = 20.0;

/// Builds playout schedules against a [`SchedulerStore`].
pub struct ScheduleBuilder<'a> {
    store: &'a dyn SchedulerStore,
    config: SchedulingConfig,
    cancel: CancellationToken,
    rng: StdRng,
}

struct FillOutcome {
    items: Vec<PlacedItem>,
    total_duration: f64,
    stats: DelayReductionStats,
    category_resets: HashMap<String, u32>,
    advisories: Vec<String>,
}

impl<'a> ScheduleBuilder<'a> {
    pub fn new(store: &'a dyn SchedulerStore, config: SchedulingConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic jitter and daytime draws, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Checked at the top of every slot; cancellation discards partial state.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build a single 24-hour schedule for `date`.
    pub async fn build_daily(
        &mut self,
        date: NaiveDate,
        name: Option<&str>,
        max_errors: Option<u32>,
    ) -> Result<BuildSummary, BuildFailure> {
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Daily Schedule for {date}"));
        let max_errors = max_errors.unwrap_or(self.config.max_consecutive_errors);
        self.build_window(date, 1, &name, max_errors, Vec::new()).await
    }

    /// Build one schedule spanning seven days, starting on a Sunday. A
    /// non-Sunday start is corrected back to the preceding Sunday.
    pub async fn build_weekly(
        &mut self,
        start_date: NaiveDate,
        name: Option<&str>,
    ) -> Result<BuildSummary, BuildFailure> {
        let days_past_sunday = start_date.weekday().num_days_from_sunday() as u64;
        let corrected = start_date - Days::new(days_past_sunday);
        let mut advisories = Vec::new();
        if corrected != start_date {
            info!(requested = %start_date, corrected = %corrected, "Adjusted weekly start to preceding Sunday");
            advisories.push(format!(
                "start date {start_date} is not a Sunday; corrected to {corrected}"
            ));
        }
        let end = corrected + Days::new(6);
        let name = name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("[WEEKLY] Schedule: {corrected} - {end}"));
        let max_errors = self.config.max_consecutive_errors;
        self.build_window(corrected, 7, &name, max_errors, advisories).await
    }

    /// Build one schedule covering a calendar month, day by day.
    pub async fn build_monthly(
        &mut self,
        year: i32,
        month: u32,
    ) -> Result<BuildSummary, BuildFailure> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            BuildFailure::new(
                BuildErrorKind::InvalidInput,
                format!("invalid year/month: {year}-{month}"),
            )
        })?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .expect("first of month is valid");
        let num_days = (next_month - start).num_days() as u32;
        let name = format!("Monthly Schedule for {}", start.format("%B %Y"));
        let max_errors = self.config.max_consecutive_errors;
        self.build_window(start, num_days, &name, max_errors, Vec::new()).await
    }

    async fn build_window(
        &mut self,
        start_date: NaiveDate,
        num_days: u32,
        name: &str,
        max_errors: u32,
        mut advisories: Vec<String>,
    ) -> Result<BuildSummary, BuildFailure> {
        let existing = self
            .store
            .find_schedule_by_date(start_date)
            .await
            .map_err(db_failure)?;
        if let Some(existing_id) = existing {
            return Err(BuildFailure::new(
                BuildErrorKind::AlreadyExists,
                format!("schedule {existing_id} already exists for {start_date}"),
            ));
        }

        let schedule_id = self
            .store
            .create_schedule(name, start_date)
            .await
            .map_err(db_failure)?;
        info!(schedule_id, %start_date, num_days, "Created schedule record");

        if self.config.holiday_greetings.enabled {
            match self.store.assign_holiday_pools(start_date, num_days).await {
                Ok(assigned) => {
                    info!(assigned, num_days, "Assigned holiday greeting daily pools")
                }
                Err(e) => warn!(error = ?e, "Failed to assign holiday greeting pools (non-fatal)"),
            }
        }

        let outcome = match self.fill_window(schedule_id, start_date, num_days, max_errors).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.rollback(schedule_id).await;
                return Err(failure);
            }
        };

        let multi_day = num_days > 1;
        let new_items: Vec<_> = outcome.items.iter().map(|i| i.to_new_item(multi_day)).collect();
        let saved = match self.store.save_items(schedule_id, &new_items).await {
            Ok(saved) => saved,
            Err(e) => {
                self.rollback(schedule_id).await;
                return Err(db_failure(e));
            }
        };
        if let Err(e) = self
            .store
            .update_schedule_duration(schedule_id, outcome.total_duration)
            .await
        {
            self.rollback(schedule_id).await;
            return Err(db_failure(e));
        }

        advisories.extend(outcome.advisories);
        log_delay_stats(&outcome.stats, &outcome.category_resets);
        info!(
            schedule_id,
            items = saved,
            hours = outcome.total_duration / 3600.0,
            "Schedule build complete"
        );

        Ok(BuildSummary {
            schedule_id,
            total_items: saved,
            total_duration_hours: outcome.total_duration / 3600.0,
            delay_reduction_stats: outcome.stats,
            category_reset_counts: outcome.category_resets,
            advisories,
        })
    }

    async fn fill_window(
        &mut self,
        schedule_id: i32,
        start_date: NaiveDate,
        num_days: u32,
        max_errors: u32,
    ) -> Result<FillOutcome, BuildFailure> {
        let schedule_start: DateTime<Utc> = start_date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();

        let mut rotation = RotationController::new(&self.config.rotation_order);
        let mut holiday = HolidayRotator::new(self.config.holiday_greetings.enabled);
        let mut featured_cycle = FeaturedCycle::new();
        let featured_config = self.config.featured_content.clone();

        let mut items: Vec<PlacedItem> = Vec::new();
        let mut exclude_ids: Vec<i32> = Vec::new();
        let mut recent_plays: HashMap<i32, Vec<f64>> = HashMap::new();
        let mut last_scheduled_theme: Option<String> = None;
        let mut last_featured_seconds = f64::NEG_INFINITY;

        let mut total_duration = 0.0_f64;
        let mut sequence_number = 1;

        let mut stats = DelayReductionStats::default();
        let mut category_resets: HashMap<String, u32> = HashMap::new();
        let mut advisories: Vec<String> = Vec::new();
        let mut reset_advised: HashSet<String> = HashSet::new();

        let mut consecutive_errors = 0u32;
        let mut total_errors = 0u32;
        let mut last_progress_duration = 0.0_f64;
        let mut no_progress_iterations = 0u32;
        let mut consecutive_no_content_cycles = 0u32;
        let mut days_completed = 0u32;

        for day_offset in 0..num_days {
            let day_date = start_date + Days::new(day_offset as u64);
            let day_start = day_offset as f64 * DAY_SECONDS;
            let day_target = (day_offset + 1) as f64 * DAY_SECONDS;
            // Position right after the last real placement of this day, used
            // by the completeness check (gap acceptance jumps past it).
            let mut day_filled_end = day_start;

            rotation.reset();
            debug!(schedule_id, %day_date, day_offset, "Filling day");

            while total_duration < day_target {
                if self.cancel.is_cancelled() {
                    return Err(BuildFailure::new(
                        BuildErrorKind::Cancelled,
                        "schedule build cancelled",
                    )
                    .stopped_at(total_duration / 3600.0)
                    .days_completed(days_completed));
                }

                let remaining_hours = (day_target - total_duration) / 3600.0;

                // Featured first: minimum spacing, then the daytime-bias draw.
                let mut selected: Option<Candidate> = None;
                if spacing_satisfied(total_duration, last_featured_seconds, &featured_config)
                    && prefers_featured_slot(&mut self.rng, total_duration, &featured_config)
                {
                    match self.store.featured_content(&[], day_date).await {
                        Ok(list) => {
                            let eligible: Vec<Candidate> = list
                                .into_iter()
                                .filter(|c| should_auto_feature(c, day_date, &self.config))
                                .collect();
                            if let Some(choice) = featured_cycle.next(&eligible) {
                                let mut choice = choice.clone();
                                choice.featured = true;
                                info!(
                                    title = %choice.content_title,
                                    at_hours = total_duration / 3600.0,
                                    daytime = is_daytime_slot(total_duration, &featured_config),
                                    "Scheduling featured content"
                                );
                                selected = Some(choice);
                            }
                        }
                        Err(e) => {
                            warn!(error = ?e, "Featured content query failed; falling back to rotation")
                        }
                    }
                }

                let mut token_for_slot: Option<RotationToken> = None;
                let mut pool: Vec<Candidate> = Vec::new();
                let mut batch_reset = false;

                if selected.is_none() {
                    let token = rotation.current().clone();

                    // Don't force a long program into the last hour of a day.
                    if remaining_hours < LONG_FORM_CUTOFF_HOURS
                        && token == RotationToken::Category(DurationCategory::LongForm)
                    {
                        info!(remaining_hours, "Skipping long_form near end of day");
                        rotation.advance();
                        consecutive_errors = 0;
                        continue;
                    }

                    // Spots slots consult the greeting rotator before
                    // ordinary selection.
                    if token.category() == Some(DurationCategory::Spots) && holiday.enabled() {
                        match holiday
                            .next_greeting(self.store, day_date, last_scheduled_theme.as_deref())
                            .await
                        {
                            Ok(Some(mut greeting)) => {
                                greeting.theme = Some(HOLIDAY_THEME.to_owned());
                                selected = Some(greeting);
                            }
                            Ok(None) => {}
                            Err(e) => return Err(db_failure(e)),
                        }
                    }

                    if selected.is_none() {
                        let batch = content_with_progressive_delays(
                            self.store,
                            &token,
                            &mut exclude_ids,
                            day_date,
                            &holiday,
                        )
                        .await
                        .map_err(db_failure)?;
                        batch_reset = batch.reset_occurred;
                        pool = batch.candidates;
                    }
                    token_for_slot = Some(token);
                }

                if selected.is_none() && pool.is_empty() {
                    let token = token_for_slot.expect("rotation path sets the token");
                    warn!(
                        token = %token,
                        remaining_hours,
                        "No available content for rotation slot"
                    );

                    consecutive_errors += 1;
                    total_errors += 1;
                    rotation.advance();

                    if rotation.at_cycle_start() {
                        consecutive_no_content_cycles += 1;
                        warn!(
                            cycles = consecutive_no_content_cycles,
                            "Completed full rotation cycle with no available content"
                        );
                        if consecutive_no_content_cycles >= MAX_NO_CONTENT_CYCLES {
                            if remaining_hours < TAIL_GAP_HOURS {
                                advisories.push(format!(
                                    "accepted {remaining_hours:.1}h gap at end of {day_date}"
                                ));
                                total_duration = day_target;
                                break;
                            }
                            error!(
                                cycles = consecutive_no_content_cycles,
                                "All rotation categories blocked; aborting"
                            );
                            return Err(BuildFailure::new(
                                BuildErrorKind::InfiniteLoopAllBlocked,
                                format!(
                                    "no content available after {consecutive_no_content_cycles} complete rotation cycles; all content is blocked by replay delays"
                                ),
                            )
                            .stopped_at(total_duration / 3600.0)
                            .days_completed(days_completed));
                        }
                    }

                    if total_duration == last_progress_duration {
                        no_progress_iterations += 1;
                        if no_progress_iterations >= MAX_NO_PROGRESS_ITERATIONS {
                            if remaining_hours < TAIL_GAP_HOURS {
                                advisories.push(format!(
                                    "accepted {remaining_hours:.1}h gap at end of {day_date}"
                                ));
                                total_duration = day_target;
                                break;
                            }
                            error!(
                                iterations = no_progress_iterations,
                                at_hours = total_duration / 3600.0,
                                "No progress; aborting"
                            );
                            return Err(BuildFailure::new(
                                BuildErrorKind::InfiniteLoop,
                                format!(
                                    "no progress for {no_progress_iterations} iterations at {:.2} hours",
                                    total_duration / 3600.0
                                ),
                            )
                            .stopped_at(total_duration / 3600.0)
                            .days_completed(days_completed));
                        }
                    }

                    if consecutive_errors >= max_errors && remaining_hours > 1.0 {
                        error!(
                            consecutive_errors,
                            total_errors, remaining_hours, "Error budget exhausted; aborting"
                        );
                        return Err(BuildFailure::new(
                            BuildErrorKind::InsufficientContent,
                            format!(
                                "no available content after {total_errors} attempts; check content availability"
                            ),
                        )
                        .stopped_at(total_duration / 3600.0)
                        .days_completed(days_completed));
                    }

                    continue;
                }

                // Pick the winner: a featured/greeting selection is used
                // directly, otherwise score the pool.
                let mut chosen_index = 0usize;
                let mut content = match selected {
                    Some(content) => content,
                    None => {
                        let token = token_for_slot.as_ref().expect("rotation path sets the token");
                        let params = ScoreParams {
                            position_seconds: total_duration,
                            remaining_hours,
                            requested: token,
                            recent_plays: &recent_plays,
                            scheduled_items: &items,
                            config: &self.config,
                        };
                        let mut best_score = f64::NEG_INFINITY;
                        for (index, candidate) in pool.iter().enumerate() {
                            let jitter = self.rng.random_range(-5.0..=5.0);
                            let score = score_candidate(candidate, &params, jitter);
                            if score > best_score {
                                best_score = score;
                                chosen_index = index;
                            }
                        }
                        debug!(
                            asset_id = pool[chosen_index].asset_id,
                            title = %pool[chosen_index].content_title,
                            score = best_score,
                            delay_factor = pool[chosen_index].delay_factor_used,
                            "Selected candidate"
                        );
                        pool[chosen_index].clone()
                    }
                };

                stats.record_factor(content.delay_factor_used);
                if content.was_reset {
                    stats.resets += 1;
                    if let Some(token) = &token_for_slot {
                        *category_resets.entry(token.as_str().to_owned()).or_default() += 1;
                    }
                }
                if batch_reset
                    && let Some(token) = &token_for_slot
                    && reset_advised.insert(token.as_str().to_owned())
                {
                    advisories.push(format!(
                        "category {token} exhausted; delays were reset to allow reuse"
                    ));
                }
                consecutive_errors = 0;

                // End-of-window fitting: swap for the first alternative that
                // fits and has no theme conflict, or close the day.
                let mut content_duration = content.duration_seconds;
                let remaining_seconds = day_target - total_duration;
                if content_duration > remaining_seconds {
                    let mut found_fitting = false;
                    for (index, alternative) in pool.iter().enumerate() {
                        if index == chosen_index {
                            continue;
                        }
                        if alternative.duration_seconds <= remaining_seconds
                            && !has_theme_conflict(alternative, &items, Some(remaining_hours))
                        {
                            info!(
                                minutes = remaining_seconds / 60.0,
                                "Found alternative content that fits the remaining window"
                            );
                            content = alternative.clone();
                            content_duration = alternative.duration_seconds;
                            found_fitting = true;
                            break;
                        }
                    }
                    if !found_fitting {
                        info!(
                            minutes = remaining_seconds / 60.0,
                            at_hours = total_duration / 3600.0,
                            "No content fits the remaining window; closing day"
                        );
                        if remaining_seconds < 60.0 {
                            advisories.push(format!(
                                "accepted {remaining_seconds:.1}s gap at end of {day_date}"
                            ));
                        }
                        total_duration = day_target;
                        continue;
                    }
                }

                // Placement.
                let is_greeting =
                    is_holiday_greeting(&content.file_name, Some(&content.content_title));
                let theme = if is_greeting {
                    Some(HOLIDAY_THEME.to_owned())
                } else {
                    content.theme.as_deref().map(str::trim).filter(|t| !t.is_empty()).map(str::to_owned)
                };
                let start_seconds = total_duration;
                items.push(PlacedItem {
                    asset_id: content.asset_id,
                    instance_id: content.instance_id,
                    sequence_number,
                    start_seconds,
                    duration_seconds: content_duration,
                    content_type: content.content_type.clone(),
                    theme: theme.clone(),
                    duration_category: content.duration_category,
                    file_name: content.file_name.clone(),
                    featured: content.featured,
                });
                exclude_ids.push(content.asset_id);
                recent_plays.entry(content.asset_id).or_default().push(start_seconds);

                total_duration += content_duration + FRAME_GAP_SECONDS;
                day_filled_end = total_duration;
                sequence_number += 1;

                // Featured placements stand outside the rotation.
                if content.featured {
                    last_featured_seconds = start_seconds;
                } else {
                    rotation.advance();
                }
                last_scheduled_theme = theme;

                let air_time = schedule_start
                    + chrono::Duration::microseconds((start_seconds * 1_000_000.0) as i64);
                if let Err(e) = self.store.mark_asset_scheduled(content.asset_id, air_time).await {
                    warn!(asset_id = content.asset_id, error = ?e, "Failed to update last_scheduled_date");
                }
                if is_greeting
                    && let Err(e) = self.store.record_holiday_play(content.asset_id).await
                {
                    warn!(asset_id = content.asset_id, error = ?e, "Failed to record holiday greeting play");
                }

                if sequence_number % 10 == 0 {
                    info!(
                        items = sequence_number - 1,
                        hours = total_duration / 3600.0,
                        "Schedule progress"
                    );
                }

                no_progress_iterations = 0;
                last_progress_duration = total_duration;
                consecutive_no_content_cycles = 0;
            }

            // Day completeness: a short tail is an advisory, an early stall
            // means the library can't sustain the channel.
            let day_filled = day_filled_end - day_start;
            let completion = day_filled / DAY_SECONDS;
            if completion < DAY_COMPLETION_MINIMUM {
                let hours_filled = day_filled / 3600.0;
                if hours_filled < DAY_TAIL_MINIMUM_HOURS {
                    error!(
                        %day_date,
                        hours_filled,
                        "Day closed too empty; insufficient content"
                    );
                    return Err(BuildFailure::new(
                        BuildErrorKind::InsufficientContent,
                        format!(
                            "{day_date} could only be filled for {hours_filled:.1} hours; add more content or adjust replay delays"
                        ),
                    )
                    .stopped_at(day_filled_end / 3600.0)
                    .days_completed(days_completed));
                }
                warn!(%day_date, hours_filled, "Day has an end-of-day gap");
                advisories.push(format!(
                    "{day_date} closed {:.1}% full ({hours_filled:.1}h)",
                    completion * 100.0
                ));
            }
            days_completed += 1;

            // The next day starts on its own boundary.
            if total_duration < day_target {
                total_duration = day_target;
            }
        }

        Ok(FillOutcome {
            items,
            total_duration,
            stats,
            category_resets,
            advisories,
        })
    }

    async fn rollback(&self, schedule_id: i32) {
        match self.store.delete_schedule(schedule_id).await {
            Ok(_) => info!(schedule_id, "Rolled back partial schedule"),
            Err(e) => error!(schedule_id, error = ?e, "Failed to roll back partial schedule"),
        }
    }
}

fn db_failure(e: anyhow::Error) -> BuildFailure {
    BuildFailure::new(BuildErrorKind::TransientDb, format!("database error: {e}"))
}

fn log_delay_stats(stats: &DelayReductionStats, category_resets: &HashMap<String, u32>) {
    let total = stats.total();
    if total == 0 {
        return;
    }
    info!(
        total,
        full_delays = stats.full_delays,
        reduced_75 = stats.reduced_75,
        reduced_50 = stats.reduced_50,
        reduced_25 = stats.reduced_25,
        no_delays = stats.no_delays,
        resets = stats.resets,
        "Delay reduction statistics"
    );
    let reduced = total - stats.full_delays;
    if reduced as f64 > total as f64 * 0.2 {
        warn!(
            reduced,
            total,
            "More than 20% of items required reduced delays; consider adding content or adjusting delay settings"
        );
    }
    for (category, count) in category_resets {
        if *count > 0 {
            warn!(category = %category, count, "Category delay resets during build");
        }
    }
}
