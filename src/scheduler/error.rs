//! Build results and the failure taxonomy.

use serde::Serialize;
use std::collections::HashMap;

/// Why a schedule build failed. Every failure rolls the schedule row back,
/// preserving the "schedule is complete or absent" invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// A schedule already exists for the requested date or window.
    AlreadyExists,
    /// No progress for too many iterations while real time remained.
    InfiniteLoop,
    /// Multiple full rotation cycles produced no placement.
    InfiniteLoopAllBlocked,
    /// A day closed too empty, or errors exhausted the budget.
    InsufficientContent,
    /// Bad date or unknown category in the request.
    InvalidInput,
    /// The build was cancelled; partial state discarded.
    Cancelled,
    /// Retryable database failure; partial state rolled back.
    TransientDb,
}

impl BuildErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::InfiniteLoop => "infinite_loop",
            Self::InfiniteLoopAllBlocked => "infinite_loop_all_blocked",
            Self::InsufficientContent => "insufficient_content",
            Self::InvalidInput => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::TransientDb => "transient_db_error",
        }
    }
}

/// A failed build, with enough context for the caller's structured result.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BuildFailure {
    pub kind: BuildErrorKind,
    pub message: String,
    pub stopped_at_hours: Option<f64>,
    pub days_completed: Option<u32>,
}

impl BuildFailure {
    pub fn new(kind: BuildErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stopped_at_hours: None,
            days_completed: None,
        }
    }

    pub fn stopped_at(mut self, hours: f64) -> Self {
        self.stopped_at_hours = Some(hours);
        self
    }

    pub fn days_completed(mut self, days: u32) -> Self {
        self.days_completed = Some(days);
        self
    }
}

/// Delay relaxations and resets observed during a build. Not errors --
/// returned in the success payload as advisories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelayReductionStats {
    pub full_delays: u32,
    pub reduced_75: u32,
    pub reduced_50: u32,
    pub reduced_25: u32,
    pub no_delays: u32,
    pub resets: u32,
}

impl DelayReductionStats {
    /// Tally a placement made under the given delay factor.
    pub fn record_factor(&mut self, factor: f64) {
        if factor >= 1.0 {
            self.full_delays += 1;
        } else if factor >= 0.75 {
            self.reduced_75 += 1;
        } else if factor >= 0.5 {
            self.reduced_50 += 1;
        } else if factor >= 0.25 {
            self.reduced_25 += 1;
        } else {
            self.no_delays += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.full_delays + self.reduced_75 + self.reduced_50 + self.reduced_25 + self.no_delays
    }
}

/// A completed build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub schedule_id: i32,
    pub total_items: usize,
    pub total_duration_hours: f64,
    pub delay_reduction_stats: DelayReductionStats,
    pub category_reset_counts: HashMap<String, u32>,
    /// Non-fatal warnings: resets fired, end-of-day gaps accepted, corrected
    /// start dates.
    pub advisories: Vec<String>,
}
