//! Shared application state.

use crate::config::Config;
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

/// Condition a background worker last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    Running,
    Disabled,
    Failing,
}

/// Live health board: workers overwrite their own entry whenever their
/// condition changes, `/api/status` reads the whole board.
#[derive(Clone, Default)]
pub struct HealthBoard {
    board: Arc<DashMap<&'static str, WorkerHealth>>,
}

impl HealthBoard {
    pub fn report(&self, worker: &'static str, health: WorkerHealth) {
        self.board.insert(worker, health);
    }

    /// Current condition of every worker that has reported at least once.
    pub fn snapshot(&self) -> Vec<(&'static str, WorkerHealth)> {
        self.board.iter().map(|entry| (*entry.key(), *entry.value())).collect()
    }

    pub fn any_failing(&self) -> bool {
        self.board.iter().any(|entry| *entry.value() == WorkerHealth::Failing)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
    pub health: HealthBoard,
}

impl AppState {
    pub fn new(db_pool: PgPool, config: Arc<Config>) -> Self {
        Self {
            db_pool,
            config,
            health: HealthBoard::default(),
        }
    }
}
