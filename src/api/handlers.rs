use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use http::StatusCode;
use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::{DeletedResponse, HealthResponse};
use crate::delivery::{CreateDeliveryRequest, DeliveryPatch, DeliveryReconciler, DeliveryView};
use crate::error::{AppError, AppResult};
use crate::ledger::models::{ActivityPatch, ActorType, LedgerRecord};
use crate::rollover::RolloverEngine;

#[derive(Clone)]
pub struct AppState {
    pub rollover: Arc<RolloverEngine>,
    pub reconciler: Arc<DeliveryReconciler>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "eggchain-backend".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /:actor_type/activity/today/:actor_key
///
/// Get-or-create: the first touch after the cutover materializes the new
/// day's record.
pub async fn get_todays_activity(
    State(state): State<AppState>,
    Path((actor_type, actor_key)): Path<(String, String)>,
) -> AppResult<Json<LedgerRecord>> {
    let actor_type = ActorType::parse(&actor_type)?;
    let actor = state.rollover.resolve_actor(actor_type, &actor_key).await?;
    let record = state.rollover.get_or_create_today(&actor).await?;
    Ok(Json(record))
}

/// GET /:actor_type/activity/:actor_key/all
pub async fn list_activities(
    State(state): State<AppState>,
    Path((actor_type, actor_key)): Path<(String, String)>,
) -> AppResult<Json<Vec<LedgerRecord>>> {
    let actor_type = ActorType::parse(&actor_type)?;
    let actor = state.rollover.resolve_actor(actor_type, &actor_key).await?;
    let records = state.rollover.list_records(&actor).await?;
    Ok(Json(records))
}

/// GET /:actor_type/activity/:actor_key/last30days
pub async fn list_last_30_days(
    State(state): State<AppState>,
    Path((actor_type, actor_key)): Path<(String, String)>,
) -> AppResult<Json<Vec<LedgerRecord>>> {
    let actor_type = ActorType::parse(&actor_type)?;
    let actor = state.rollover.resolve_actor(actor_type, &actor_key).await?;
    let records = state.rollover.last_30_days(&actor).await?;
    Ok(Json(records))
}

/// GET /:actor_type/activity/date/:date
pub async fn activities_by_date(
    State(state): State<AppState>,
    Path((actor_type, date)): Path<(String, String)>,
) -> AppResult<Json<Vec<LedgerRecord>>> {
    let actor_type = ActorType::parse(&actor_type)?;
    let date = parse_date(&date)?;
    let records = state.rollover.records_for_date(actor_type, date).await?;
    Ok(Json(records))
}

/// PUT /:actor_type/activity/record/:record_id
pub async fn update_activity(
    State(state): State<AppState>,
    Path((actor_type, record_id)): Path<(String, Uuid)>,
    Json(body): Json<serde_json::Value>,
) -> AppResult<Json<LedgerRecord>> {
    let actor_type = ActorType::parse(&actor_type)?;
    let patch = parse_patch(actor_type, body)?;
    let record = state.rollover.update_record(record_id, patch).await?;
    info!("updated {} record {}", actor_type, record_id);
    Ok(Json(record))
}

/// DELETE /:actor_type/activity/record/:record_id
pub async fn delete_activity(
    State(state): State<AppState>,
    Path((_actor_type, record_id)): Path<(String, Uuid)>,
) -> AppResult<Json<DeletedResponse>> {
    state.rollover.delete_record(record_id).await?;
    info!("deleted record {}", record_id);
    Ok(Json(DeletedResponse { deleted: true }))
}

/// POST /delivery
pub async fn create_delivery(
    State(state): State<AppState>,
    Json(request): Json<CreateDeliveryRequest>,
) -> AppResult<(StatusCode, Json<DeliveryView>)> {
    request
        .validate()
        .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
    let view = state.reconciler.record_delivery(request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /delivery/:delivery_id
pub async fn get_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
) -> AppResult<Json<DeliveryView>> {
    let view = state.reconciler.get_delivery(delivery_id).await?;
    Ok(Json(view))
}

/// PUT /delivery/:delivery_id
pub async fn update_delivery(
    State(state): State<AppState>,
    Path(delivery_id): Path<Uuid>,
    Json(patch): Json<DeliveryPatch>,
) -> AppResult<Json<DeliveryView>> {
    patch
        .validate()
        .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
    let view = state.reconciler.update_delivery(delivery_id, patch).await?;
    Ok(Json(view))
}

fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidArgument(format!("invalid date: {}", raw)))
}

fn parse_patch(actor_type: ActorType, body: serde_json::Value) -> AppResult<ActivityPatch> {
    let invalid = |e: serde_json::Error| AppError::InvalidArgument(format!("invalid patch: {}", e));
    match actor_type {
        ActorType::Buyer => Ok(ActivityPatch::Buyer(
            serde_json::from_value(body).map_err(invalid)?,
        )),
        ActorType::Courier => Ok(ActivityPatch::Courier(
            serde_json::from_value(body).map_err(invalid)?,
        )),
        ActorType::Warehouse => Ok(ActivityPatch::Warehouse(
            serde_json::from_value(body).map_err(invalid)?,
        )),
        ActorType::Importer => Ok(ActivityPatch::Importer(
            serde_json::from_value(body).map_err(invalid)?,
        )),
    }
}
