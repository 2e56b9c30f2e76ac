//! Schedule build and editing handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::config::SchedulingConfig;
use crate::data::models::{ScheduleRow, ScheduledItemRow};
use crate::data::{items, schedules};
use crate::scheduler::builder::ScheduleBuilder;
use crate::scheduler::error::{BuildErrorKind, BuildFailure, BuildSummary};
use crate::scheduler::store::PgStore;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

#[derive(Deserialize)]
pub struct CreateDailyRequest {
    pub date: String,
    pub name: Option<String>,
    pub max_errors: Option<u32>,
}

#[derive(Deserialize)]
pub struct CreateWeeklyRequest {
    pub start_date: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateMonthlyRequest {
    pub year: i32,
    pub month: u32,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub from: usize,
    pub to: usize,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub asset_id: Option<i32>,
    pub duration_seconds: f64,
    /// Title for a live-input placeholder (no asset).
    pub live_input_title: Option<String>,
}

#[derive(Serialize)]
pub struct ScheduleDetailResponse {
    #[serde(flatten)]
    pub schedule: ScheduleRow,
    pub items: Vec<ScheduledItemRow>,
}

/// Turn a build result into the structured API payload: created schedule and
/// stats on success, the error taxonomy with context on failure.
fn build_response(result: Result<BuildSummary, BuildFailure>) -> Response {
    match result {
        Ok(summary) => {
            let mut body = serde_json::to_value(&summary).expect("summary serializes");
            body["success"] = json!(true);
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(failure) => {
            let status = match failure.kind {
                BuildErrorKind::AlreadyExists => StatusCode::CONFLICT,
                BuildErrorKind::TransientDb => StatusCode::INTERNAL_SERVER_ERROR,
                BuildErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            let body = json!({
                "success": false,
                "error": failure.kind.as_str(),
                "message": failure.message,
                "stopped_at_hours": failure.stopped_at_hours,
                "days_completed": failure.days_completed,
            });
            (status, Json(body)).into_response()
        }
    }
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("invalid {field}: '{value}', expected YYYY-MM-DD")))
}

/// Each build gets its own immutable policy snapshot; never reloaded mid-run.
fn load_scheduling_config(state: &AppState) -> Result<Arc<SchedulingConfig>, ApiError> {
    SchedulingConfig::load(&state.config.scheduling_file)
        .map(Arc::new)
        .map_err(|e| ApiError::invalid_input(format!("scheduling config: {e}")))
}

/// `POST /api/schedules/daily`
pub(super) async fn create_daily(
    State(state): State<AppState>,
    Json(request): Json<CreateDailyRequest>,
) -> Result<Response, ApiError> {
    let date = parse_date(&request.date, "date")?;
    let scheduling = load_scheduling_config(&state)?;
    let store = PgStore::new(state.db_pool.clone(), scheduling.clone());
    let mut builder = ScheduleBuilder::new(&store, (*scheduling).clone());
    let result = builder
        .build_daily(date, request.name.as_deref(), request.max_errors)
        .await;
    Ok(build_response(result))
}

/// `POST /api/schedules/weekly`
pub(super) async fn create_weekly(
    State(state): State<AppState>,
    Json(request): Json<CreateWeeklyRequest>,
) -> Result<Response, ApiError> {
    let start_date = parse_date(&request.start_date, "start_date")?;
    let scheduling = load_scheduling_config(&state)?;
    let store = PgStore::new(state.db_pool.clone(), scheduling.clone());
    let mut builder = ScheduleBuilder::new(&store, (*scheduling).clone());
    let result = builder.build_weekly(start_date, request.name.as_deref()).await;
    Ok(build_response(result))
}

/// `POST /api/schedules/monthly`
pub(super) async fn create_monthly(
    State(state): State<AppState>,
    Json(request): Json<CreateMonthlyRequest>,
) -> Result<Response, ApiError> {
    let scheduling = load_scheduling_config(&state)?;
    let store = PgStore::new(state.db_pool.clone(), scheduling.clone());
    let mut builder = ScheduleBuilder::new(&store, (*scheduling).clone());
    let result = builder.build_monthly(request.year, request.month).await;
    Ok(build_response(result))
}

/// `GET /api/schedules?start_date=&end_date=`
pub(super) async fn list_schedules(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ScheduleRow>>, ApiError> {
    let rows = schedules::list_active(&state.db_pool, params.start_date, params.end_date)
        .await
        .map_err(|e| db_error("Schedule list", e))?;
    Ok(Json(rows))
}

/// `GET /api/schedules/{id}`
pub(super) async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<ScheduleDetailResponse>, ApiError> {
    let schedule = schedules::get_by_id(&state.db_pool, schedule_id)
        .await
        .map_err(|e| db_error("Schedule lookup", e))?
        .ok_or_else(|| ApiError::not_found(format!("schedule {schedule_id} not found")))?;
    let items = schedules::list_items(&state.db_pool, schedule_id)
        .await
        .map_err(|e| db_error("Schedule items", e))?;
    Ok(Json(ScheduleDetailResponse { schedule, items }))
}

/// `DELETE /api/schedules/{id}`
pub(super) async fn delete_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = schedules::delete(&state.db_pool, schedule_id)
        .await
        .map_err(|e| db_error("Schedule delete", e))?;
    if !deleted {
        return Err(ApiError::not_found(format!("schedule {schedule_id} not found")));
    }
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/schedules/{id}/items/reorder`
pub(super) async fn reorder_items(
    State(state): State<AppState>,
    Path(schedule_id): Path<i32>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ok = items::reorder(&state.db_pool, schedule_id, request.from, request.to)
        .await
        .map_err(|e| db_error("Item reorder", e))?;
    if !ok {
        return Err(ApiError::invalid_input("position out of range or empty schedule"));
    }
    items::recalculate_times(&state.db_pool, schedule_id)
        .await
        .map_err(|e| db_error("Time recalculation", e))?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/schedules/{id}/items`
pub(super) async fn add_item(
    State(state): State<AppState>,
    Path(schedule_id): Path<i32>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.asset_id.is_none() && request.live_input_title.is_none() {
        return Err(ApiError::invalid_input(
            "either asset_id or live_input_title is required",
        ));
    }
    let add = items::AddItem {
        asset_id: request.asset_id,
        duration_seconds: request.duration_seconds,
        live_input_title: request.live_input_title,
    };
    let item_id = items::add(&state.db_pool, schedule_id, &add)
        .await
        .map_err(|e| db_error("Item add", e))?
        .ok_or_else(|| ApiError::invalid_input("asset has no primary instance"))?;
    Ok(Json(json!({ "ok": true, "item_id": item_id })))
}

/// `DELETE /api/schedules/{id}/items/{item_id}`
pub(super) async fn delete_item(
    State(state): State<AppState>,
    Path((schedule_id, item_id)): Path<(i32, i32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ok = items::delete(&state.db_pool, schedule_id, item_id)
        .await
        .map_err(|e| db_error("Item delete", e))?;
    if !ok {
        return Err(ApiError::not_found(format!(
            "item {item_id} not found in schedule {schedule_id}"
        )));
    }
    items::recalculate_times(&state.db_pool, schedule_id)
        .await
        .map_err(|e| db_error("Time recalculation", e))?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/schedules/{id}/items/{item_id}/availability`
pub(super) async fn set_item_availability(
    State(state): State<AppState>,
    Path((schedule_id, item_id)): Path<(i32, i32)>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ok = items::toggle_availability(&state.db_pool, schedule_id, item_id, request.available)
        .await
        .map_err(|e| db_error("Item availability", e))?;
    if !ok {
        return Err(ApiError::not_found(format!(
            "item {item_id} not found in schedule {schedule_id}"
        )));
    }
    Ok(Json(json!({ "ok": true })))
}
