//! End-to-end builder scenarios against the in-memory store: window filling,
//! rotation, theme separation, featured spacing, holiday rotation, and the
//! failure taxonomy.

mod common;

use chrono::{Datelike, NaiveDate, Timelike, Weekday};
use common::{InMemoryStore, asset, with_name, with_theme, with_type};
use playout::config::{ContentPriorityConfig, SchedulingConfig};
use playout::scheduler::builder::ScheduleBuilder;
use playout::scheduler::error::BuildErrorKind;
use playout::scheduler::rotation::DurationCategory;
use playout::scheduler::store::NewScheduledItem;
use playout::scheduler::timing::{DAY_SECONDS, FRAME_GAP_SECONDS};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn start_seconds(item: &NewScheduledItem) -> f64 {
    let day_offset = item
        .metadata
        .as_ref()
        .and_then(|m| m.get("day_offset"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as f64;
    let t = item.scheduled_start_time;
    day_offset * DAY_SECONDS
        + t.num_seconds_from_midnight() as f64
        + t.nanosecond() as f64 / 1_000_000_000.0
}

fn is_featured(item: &NewScheduledItem) -> bool {
    item.metadata
        .as_ref()
        .and_then(|m| m.get("featured"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Property 1: sequence numbers are exactly 1..N.
fn assert_dense_sequence(items: &[NewScheduledItem]) {
    for (index, item) in items.iter().enumerate() {
        assert_eq!(
            item.sequence_number,
            index as i32 + 1,
            "sequence numbers must be dense 1..N"
        );
    }
}

/// Property 2: adjacent items are separated by duration plus one frame gap,
/// except across day boundaries.
fn assert_contiguous(items: &[NewScheduledItem]) {
    for pair in items.windows(2) {
        let a = start_seconds(&pair[0]);
        let b = start_seconds(&pair[1]);
        let expected = a + pair[0].scheduled_duration_seconds + FRAME_GAP_SECONDS;
        // A day that closed with a gap restarts the next item on the day
        // boundary.
        let crosses_boundary = (b / DAY_SECONDS).floor() > (expected / DAY_SECONDS).floor()
            || (b % DAY_SECONDS) < 1.0 && expected % DAY_SECONDS > 1.0;
        if crosses_boundary {
            continue;
        }
        assert!(
            (b - expected).abs() < 2e-3,
            "items {} and {} are not frame-contiguous: {} vs expected {}",
            pair[0].sequence_number,
            pair[1].sequence_number,
            b,
            expected
        );
    }
}

/// Property 3: total duration plus inter-item gaps stays within the window.
fn assert_window_bound(items: &[NewScheduledItem], target_seconds: f64) {
    let durations: f64 = items.iter().map(|i| i.scheduled_duration_seconds).sum();
    let total = durations + (items.len().saturating_sub(1)) as f64 * FRAME_GAP_SECONDS;
    assert!(
        total <= target_seconds + 60.0,
        "schedule overruns the window: {total} > {target_seconds} + 60"
    );
}

/// Property 7: same-theme short-form items have a long_form between them,
/// waived inside the last two hours of each day.
fn assert_theme_separation(
    items: &[NewScheduledItem],
    traits: &HashMap<i32, (DurationCategory, Option<String>)>,
) {
    let waiver_start = DAY_SECONDS - 2.0 * 3600.0;
    for (j, later) in items.iter().enumerate() {
        if (start_seconds(later) % DAY_SECONDS) >= waiver_start {
            continue;
        }
        let Some(asset_id) = later.asset_id else { continue };
        let Some((category, Some(theme))) = traits.get(&asset_id) else {
            continue;
        };
        if !category.is_short_form() {
            continue;
        }
        for earlier in items[..j].iter().rev() {
            let Some(earlier_id) = earlier.asset_id else { continue };
            let Some((earlier_category, earlier_theme)) = traits.get(&earlier_id) else {
                continue;
            };
            if *earlier_category == DurationCategory::LongForm {
                break;
            }
            if earlier_category.is_short_form()
                && earlier_theme
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(theme))
            {
                panic!(
                    "theme '{theme}' repeats at sequence {} without a long_form separator",
                    later.sequence_number
                );
            }
        }
    }
}

/// The default mixed library: 50 ids, 80 spots, 40 short_form, 20 long_form.
fn seed_mixed_library(store: &InMemoryStore) {
    for n in 1..=50 {
        store.add(with_type(asset(n, DurationCategory::Id, 10.0), "AN"));
    }
    for n in 101..=180 {
        store.add(with_type(asset(n, DurationCategory::Spots, 60.0), "PSA"));
    }
    for n in 201..=240 {
        store.add(with_type(asset(n, DurationCategory::ShortForm, 600.0), "PKG"));
    }
    for n in 301..=320 {
        store.add(with_type(asset(n, DurationCategory::LongForm, 1800.0), "MTG"));
    }
}

#[tokio::test]
async fn s1_single_category_fills_the_day() {
    let mut config = SchedulingConfig::default();
    config.rotation_order = vec!["spots".to_owned()];
    config.replay_delays.insert("spots".to_owned(), 0.0);
    config.additional_delay_per_airing.insert("spots".to_owned(), 0.0);

    let store = InMemoryStore::new(config.clone());
    for n in 1..=200 {
        store.add(asset(n, DurationCategory::Spots, 60.0));
    }

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(7);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    assert_eq!(schedule.items.len(), summary.total_items);
    // 60s items plus frame gaps: just under 1440 fit.
    assert!(
        (1435..=1440).contains(&schedule.items.len()),
        "unexpected item count {}",
        schedule.items.len()
    );
    assert!(summary.total_duration_hours >= 23.98);

    assert_dense_sequence(&schedule.items);
    assert_contiguous(&schedule.items);
    assert_window_bound(&schedule.items, DAY_SECONDS);

    // Property 10: every placement is reflected in total_airings.
    let mut placements: HashMap<i32, i32> = HashMap::new();
    for item in &schedule.items {
        *placements.entry(item.asset_id.unwrap()).or_default() += 1;
    }
    for (asset_id, count) in placements {
        assert_eq!(store.airings(asset_id), count);
    }

    // 200 assets cannot cover 1400+ slots without the reset valve.
    assert!(summary.delay_reduction_stats.resets > 0);
}

#[tokio::test]
async fn s2_default_rotation_visits_every_category() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(11);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    assert!(summary.total_duration_hours >= 23.0);
    assert!(summary.total_duration_hours <= 24.02);
    assert!(summary.delay_reduction_stats.full_delays > 0);

    let schedule = store.schedule(summary.schedule_id).unwrap();
    assert_dense_sequence(&schedule.items);
    assert_contiguous(&schedule.items);
    assert_window_bound(&schedule.items, DAY_SECONDS);

    // All four duration categories appear.
    let categories: HashSet<DurationCategory> = schedule
        .items
        .iter()
        .filter_map(|i| i.asset_id)
        .map(|id| match id {
            1..=50 => DurationCategory::Id,
            101..=180 => DurationCategory::Spots,
            201..=240 => DurationCategory::ShortForm,
            _ => DurationCategory::LongForm,
        })
        .collect();
    assert_eq!(categories.len(), 4, "rotation should visit every category");
}

#[tokio::test]
async fn s3_insufficient_content_rolls_back() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    for n in 1..=5 {
        store.add(asset(n, DurationCategory::Spots, 60.0));
    }

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(3);
    let failure = builder
        .build_daily(date("2026-03-02"), None, Some(2))
        .await
        .expect_err("5 spots cannot survive the error budget");

    assert_eq!(failure.kind, BuildErrorKind::InsufficientContent);
    assert_eq!(store.schedule_count(), 0, "failed build must leave no schedule row");
}

#[tokio::test]
async fn s4_theme_separation_holds() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    let mut traits: HashMap<i32, (DurationCategory, Option<String>)> = HashMap::new();

    let mut register = |store: &InMemoryStore, c: playout::scheduler::store::Candidate| {
        traits.insert(c.asset_id, (c.duration_category, c.theme.clone()));
        store.add(c);
    };

    // Two same-theme short_form assets among themed alternatives.
    register(&store, with_theme(asset(601, DurationCategory::ShortForm, 600.0), "Health"));
    register(&store, with_theme(asset(602, DurationCategory::ShortForm, 600.0), "Health"));
    for n in 0..20 {
        register(
            &store,
            with_theme(asset(610 + n, DurationCategory::ShortForm, 600.0), &format!("Topic {n}")),
        );
    }
    for n in 0..25 {
        register(
            &store,
            with_theme(asset(700 + n, DurationCategory::LongForm, 1800.0), &format!("Feature {n}")),
        );
    }
    for n in 0..30 {
        register(&store, asset(800 + n, DurationCategory::Id, 10.0));
    }
    for n in 0..40 {
        register(&store, asset(900 + n, DurationCategory::Spots, 60.0));
    }

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(23);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    assert_theme_separation(&schedule.items, &traits);
}

#[tokio::test]
async fn s5_featured_spacing_is_respected() {
    let mut config = SchedulingConfig::default();
    config.content_priorities.insert(
        "PMO".to_owned(),
        ContentPriorityConfig {
            always_featured: true,
            ..Default::default()
        },
    );

    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);
    store.add(with_type(asset(901, DurationCategory::ShortForm, 300.0), "PMO"));
    store.add(with_type(asset(902, DurationCategory::ShortForm, 300.0), "PMO"));

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(42);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    let featured_starts: Vec<f64> = schedule
        .items
        .iter()
        .filter(|i| is_featured(i))
        .map(start_seconds)
        .collect();

    assert!(
        featured_starts.len() >= 2,
        "expected repeated featured placements, got {}",
        featured_starts.len()
    );
    for pair in featured_starts.windows(2) {
        assert!(
            pair[1] - pair[0] >= 2.0 * 3600.0 - 1.0,
            "featured items too close: {} then {}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn s6_holiday_greetings_rotate_from_the_daily_pool() {
    let mut config = SchedulingConfig::default();
    config.holiday_greetings.enabled = true;

    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);
    let greeting_ids: Vec<i32> = (401..=406).collect();
    for (n, id) in greeting_ids.iter().enumerate() {
        let letter = char::from(b'A' + n as u8);
        store.add(with_name(
            asset(*id, DurationCategory::Spots, 20.0),
            &format!("Holiday Greeting {letter}.mp4"),
            &format!("Holiday Greeting {letter}"),
        ));
    }

    let air_date = date("2026-12-07");
    let mut builder = ScheduleBuilder::new(&store, config).with_seed(5);
    let summary = builder
        .build_daily(air_date, None, None)
        .await
        .expect("daily build should succeed");

    let pool: HashSet<i32> = store.pool_ids_for(air_date).into_iter().collect();
    assert_eq!(pool.len(), 4, "pools hold up to four greetings");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    let greeting_set: HashSet<i32> = greeting_ids.iter().copied().collect();
    let mut counts: HashMap<i32, u32> = HashMap::new();
    for item in &schedule.items {
        if let Some(asset_id) = item.asset_id
            && greeting_set.contains(&asset_id)
        {
            assert!(
                pool.contains(&asset_id),
                "greeting {asset_id} aired but was not in the daily pool"
            );
            *counts.entry(asset_id).or_default() += 1;
        }
    }

    // Every assigned greeting airs, evenly.
    assert_eq!(counts.len(), 4, "all four assigned greetings should air");
    let total: u32 = counts.values().sum();
    let ceiling = total.div_ceil(4) + 1;
    for (asset_id, count) in &counts {
        assert!(
            *count <= ceiling,
            "greeting {asset_id} aired {count} times, above the fair ceiling {ceiling}"
        );
        assert_eq!(store.greeting_plays(*asset_id), *count as i32);
    }

    // Property 9: no two adjacent greetings.
    for pair in schedule.items.windows(2) {
        let both_greetings = pair.iter().all(|i| {
            i.asset_id.is_some_and(|id| greeting_set.contains(&id))
        });
        assert!(!both_greetings, "adjacent holiday greetings found");
    }
}

#[tokio::test]
async fn weekly_corrects_start_date_and_spans_seven_days() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);

    // 2026-03-04 is a Wednesday.
    let requested = date("2026-03-04");
    assert_eq!(requested.weekday(), Weekday::Wed);

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(17);
    let summary = builder
        .build_weekly(requested, None)
        .await
        .expect("weekly build should succeed");

    assert!(
        summary.advisories.iter().any(|a| a.contains("Sunday")),
        "start correction should be surfaced as an advisory"
    );

    let schedule = store.schedule(summary.schedule_id).unwrap();
    assert_eq!(schedule.air_date.weekday(), Weekday::Sun);
    assert!(schedule.air_date < requested);

    assert_dense_sequence(&schedule.items);
    assert_contiguous(&schedule.items);
    assert_window_bound(&schedule.items, 7.0 * DAY_SECONDS);
    assert!(summary.total_duration_hours >= 0.95 * 168.0);

    let day_offsets: HashSet<u64> = schedule
        .items
        .iter()
        .filter_map(|i| i.metadata.as_ref())
        .filter_map(|m| m.get("day_offset"))
        .filter_map(|v| v.as_u64())
        .collect();
    assert_eq!(
        day_offsets,
        (0u64..7).collect::<HashSet<u64>>(),
        "every weekday gets content"
    );
}

#[tokio::test]
async fn expired_and_unlaunched_assets_never_air() {
    let mut config = SchedulingConfig::default();
    config.rotation_order = vec!["spots".to_owned()];
    config.replay_delays.insert("spots".to_owned(), 0.0);
    config.additional_delay_per_airing.insert("spots".to_owned(), 0.0);

    let store = InMemoryStore::new(config.clone());
    for n in 1..=50 {
        store.add(asset(n, DurationCategory::Spots, 60.0));
    }
    // Expired the day before the build date.
    let mut expired = asset(51, DurationCategory::Spots, 60.0);
    expired.content_expiry_date = Some(date("2026-03-01").and_hms_opt(0, 0, 0).unwrap().and_utc());
    store.add(expired);
    // Goes live the day after.
    let mut unlaunched = asset(52, DurationCategory::Spots, 60.0);
    unlaunched.go_live_date = Some(date("2026-03-03").and_hms_opt(0, 0, 0).unwrap().and_utc());
    store.add(unlaunched);

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(13);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    for item in &schedule.items {
        let asset_id = item.asset_id.unwrap();
        assert_ne!(asset_id, 51, "expired asset must never be scheduled");
        assert_ne!(asset_id, 52, "asset before its go-live date must never be scheduled");
    }
}

#[tokio::test]
async fn duplicate_date_is_a_conflict() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(29);
    builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("first build should succeed");

    let failure = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect_err("second build for the same date must fail");
    assert_eq!(failure.kind, BuildErrorKind::AlreadyExists);
    assert_eq!(store.schedule_count(), 1);
}

#[tokio::test]
async fn deleting_a_schedule_reverses_airings() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);

    let mut builder = ScheduleBuilder::new(&store, config).with_seed(31);
    let summary = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect("daily build should succeed");

    let schedule = store.schedule(summary.schedule_id).unwrap();
    let mut counts: HashMap<i32, i32> = HashMap::new();
    for item in &schedule.items {
        *counts.entry(item.asset_id.unwrap()).or_default() += 1;
    }
    // Builds start from a fresh library, so airings equal in-schedule counts
    // and must return to zero after the delete.
    for (asset_id, count) in &counts {
        assert_eq!(store.airings(*asset_id), *count);
    }

    use playout::scheduler::store::SchedulerStore;
    assert!(store.delete_schedule(summary.schedule_id).await.unwrap());
    assert_eq!(store.schedule_count(), 0);
    for asset_id in counts.keys() {
        assert_eq!(store.airings(*asset_id), 0);
    }
}

#[tokio::test]
async fn cancellation_discards_partial_state() {
    let config = SchedulingConfig::default();
    let store = InMemoryStore::new(config.clone());
    seed_mixed_library(&store);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut builder = ScheduleBuilder::new(&store, config)
        .with_seed(37)
        .with_cancellation(cancel);

    let failure = builder
        .build_daily(date("2026-03-02"), None, None)
        .await
        .expect_err("cancelled build must not complete");
    assert_eq!(failure.kind, BuildErrorKind::Cancelled);
    assert_eq!(store.schedule_count(), 0, "cancelled build must leave no schedule row");
}
