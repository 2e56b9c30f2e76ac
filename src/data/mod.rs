//! Database access: models and per-entity query modules.

pub mod assets;
pub mod holiday;
pub mod items;
pub mod models;
pub mod schedules;
pub mod sync_jobs;
