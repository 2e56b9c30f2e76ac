//! Web API router construction.

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

use crate::state::AppState;
use crate::web::{schedules, status};

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/schedules", get(schedules::list_schedules))
        .route("/schedules/daily", post(schedules::create_daily))
        .route("/schedules/weekly", post(schedules::create_weekly))
        .route("/schedules/monthly", post(schedules::create_monthly))
        .route(
            "/schedules/{id}",
            get(schedules::get_schedule).delete(schedules::delete_schedule),
        )
        .route("/schedules/{id}/items", post(schedules::add_item))
        .route("/schedules/{id}/items/reorder", post(schedules::reorder_items))
        .route(
            "/schedules/{id}/items/{item_id}",
            delete(schedules::delete_item),
        )
        .route(
            "/schedules/{id}/items/{item_id}/availability",
            post(schedules::set_item_availability),
        )
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        CompressionLayer::new(),
        // Schedule builds walk a whole window against the database; give
        // them room before the edge cuts the request.
        TimeoutLayer::new(Duration::from_secs(300)),
    ))
}
