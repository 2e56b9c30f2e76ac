//! Service configuration and the per-build scheduling policy snapshot.
//!
//! Service-level settings (database URL, port, log level) come from the
//! environment via figment. The scheduling policy is loaded separately from
//! defaults merged with an optional TOML profile, once per schedule build,
//! into an immutable snapshot -- it is never reloaded mid-run.

use anyhow::Context;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scheduler::rotation::RotationToken;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_scheduling_file() -> String {
    "scheduling.toml".to_owned()
}

fn default_expiry_sync_interval_hours() -> u64 {
    6
}

/// Service-level configuration sourced from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to wait for in-flight work on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    /// Path to the TOML scheduling policy profile (optional on disk).
    #[serde(default = "default_scheduling_file")]
    pub scheduling_file: String,
    #[serde(default = "default_expiry_sync_interval_hours")]
    pub expiry_sync_interval_hours: u64,
}

impl Config {
    /// Load service configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")
    }
}

/// Fallback replay delays (hours) for content-type rotation tokens that have
/// no explicit `replay_delays` entry.
pub const CONTENT_TYPE_DELAY_DEFAULTS: &[(&str, f64)] = &[
    ("an", 2.0),
    ("atld", 2.0),
    ("bmp", 3.0),
    ("ia", 4.0),
    ("im", 3.0),
    ("imow", 4.0),
    ("lm", 3.0),
    ("maf", 4.0),
    ("mtg", 8.0),
    ("pkg", 3.0),
    ("pmo", 3.0),
    ("psa", 2.0),
    ("spp", 3.0),
    ("szl", 3.0),
];

/// Delay for a content type with neither a config entry nor a known default.
const UNKNOWN_CONTENT_TYPE_DELAY: f64 = 4.0;

fn default_rotation_order() -> Vec<String> {
    vec![
        "id".to_owned(),
        "short_form".to_owned(),
        "long_form".to_owned(),
        "spots".to_owned(),
    ]
}

fn default_replay_delays() -> HashMap<String, f64> {
    HashMap::from([
        ("id".to_owned(), 6.0),
        ("spots".to_owned(), 12.0),
        ("short_form".to_owned(), 24.0),
        ("long_form".to_owned(), 48.0),
    ])
}

fn default_max_consecutive_errors() -> u32 {
    100
}

/// Daytime window in hours-of-day, `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaytimeHours {
    pub start: u32,
    pub end: u32,
}

impl Default for DaytimeHours {
    fn default() -> Self {
        Self { start: 6, end: 18 }
    }
}

fn default_minimum_spacing_hours() -> f64 {
    2.0
}

fn default_daytime_probability() -> f64 {
    0.75
}

/// Featured-content placement policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedContentConfig {
    #[serde(default = "default_minimum_spacing_hours")]
    pub minimum_spacing_hours: f64,
    #[serde(default)]
    pub daytime_hours: DaytimeHours,
    #[serde(default = "default_daytime_probability")]
    pub daytime_probability: f64,
}

impl Default for FeaturedContentConfig {
    fn default() -> Self {
        Self {
            minimum_spacing_hours: default_minimum_spacing_hours(),
            daytime_hours: DaytimeHours::default(),
            daytime_probability: default_daytime_probability(),
        }
    }
}

fn default_fresh_days() -> i64 {
    3
}

fn default_relevant_days() -> i64 {
    7
}

fn default_archive_days() -> i64 {
    14
}

/// Age windows (days) for meeting-relevance tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRelevanceConfig {
    #[serde(default = "default_fresh_days")]
    pub fresh_days: i64,
    #[serde(default = "default_relevant_days")]
    pub relevant_days: i64,
    #[serde(default = "default_archive_days")]
    pub archive_days: i64,
}

impl Default for MeetingRelevanceConfig {
    fn default() -> Self {
        Self {
            fresh_days: default_fresh_days(),
            relevant_days: default_relevant_days(),
            archive_days: default_archive_days(),
        }
    }
}

fn default_feature_threshold() -> i32 {
    80
}

/// Per-content-type featuring policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPriorityConfig {
    #[serde(default)]
    pub always_featured: bool,
    #[serde(default)]
    pub engagement_based: bool,
    #[serde(default = "default_feature_threshold")]
    pub feature_threshold: i32,
    #[serde(default)]
    pub auto_feature_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HolidayGreetingsConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// The full scheduling policy, loaded once per build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Ordered rotation tokens: duration categories or content types.
    #[serde(default = "default_rotation_order")]
    pub rotation_order: Vec<String>,
    /// Base replay delay in hours, keyed by category or content type.
    #[serde(default = "default_replay_delays")]
    pub replay_delays: HashMap<String, f64>,
    /// Additive hours per prior airing, keyed by category or content type.
    #[serde(default)]
    pub additional_delay_per_airing: HashMap<String, f64>,
    #[serde(default)]
    pub featured_content: FeaturedContentConfig,
    #[serde(default)]
    pub meeting_relevance: MeetingRelevanceConfig,
    /// Keyed by upper-case content type (e.g. "PMO", "MTG").
    #[serde(default)]
    pub content_priorities: HashMap<String, ContentPriorityConfig>,
    /// Days added to encoded date to derive expiry; 0 means remote-driven.
    #[serde(default)]
    pub content_expiration: HashMap<String, i64>,
    #[serde(default)]
    pub holiday_greetings: HolidayGreetingsConfig,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            rotation_order: default_rotation_order(),
            replay_delays: default_replay_delays(),
            additional_delay_per_airing: HashMap::new(),
            featured_content: FeaturedContentConfig::default(),
            meeting_relevance: MeetingRelevanceConfig::default(),
            content_priorities: HashMap::new(),
            content_expiration: HashMap::new(),
            holiday_greetings: HolidayGreetingsConfig::default(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl SchedulingConfig {
    /// Load the scheduling policy: built-in defaults merged with the TOML
    /// profile at `path` when it exists.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()
            .context("Failed to load scheduling config")
    }

    /// Built-in minimum replay delay (hours) for a content type, before any
    /// config override. Used by the proportional scoring penalty.
    pub fn content_type_min_delay(&self, content_type: &str) -> f64 {
        let key = content_type.to_lowercase();
        if let Some(hours) = self.replay_delays.get(&key) {
            return *hours;
        }
        CONTENT_TYPE_DELAY_DEFAULTS
            .iter()
            .find(|(ty, _)| *ty == key)
            .map(|(_, hours)| *hours)
            .unwrap_or(UNKNOWN_CONTENT_TYPE_DELAY)
    }

    /// Base replay delay (hours) for a rotation token.
    pub fn base_delay_hours(&self, token: &RotationToken) -> f64 {
        match token {
            RotationToken::Category(category) => self
                .replay_delays
                .get(category.as_str())
                .copied()
                .unwrap_or(24.0),
            RotationToken::ContentType(ty) => self.content_type_min_delay(ty),
        }
    }

    /// Additive delay (hours) per prior airing for a rotation token.
    pub fn additional_delay_hours(&self, token: &RotationToken) -> f64 {
        let (key, fallback) = match token {
            RotationToken::Category(category) => (category.as_str().to_owned(), 2.0),
            RotationToken::ContentType(ty) => (ty.to_lowercase(), 0.5),
        };
        self.additional_delay_per_airing
            .get(&key)
            .copied()
            .unwrap_or(fallback)
    }

    /// Content types that can ever be featured (always, engagement-based, or
    /// meeting-age-based). Manual flags are checked separately.
    pub fn featurable_types(&self) -> Vec<String> {
        self.content_priorities
            .iter()
            .filter(|(_, p)| p.always_featured || p.engagement_based || p.auto_feature_days > 0)
            .map(|(ty, _)| ty.clone())
            .collect()
    }

    /// Policy entry for a content type, if configured. Lookup is
    /// case-insensitive against the upper-case config keys.
    pub fn priority_for(&self, content_type: &str) -> Option<&ContentPriorityConfig> {
        self.content_priorities.get(&content_type.to_uppercase())
    }
}
