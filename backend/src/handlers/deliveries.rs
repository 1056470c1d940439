//! Delivery batch HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{DeliveryBatch, DeliveryProgress, DeliveryResult, NewDeliveryBatch};
use uuid::Uuid;

use crate::error::AppResult;
use crate::AppState;

/// Record a delivery batch (GRN)
pub async fn record_delivery(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Json(input): Json<NewDeliveryBatch>,
) -> AppResult<(StatusCode, Json<DeliveryResult>)> {
    let result = state
        .engine
        .deliveries()
        .record_delivery(trade_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<Vec<DeliveryBatch>>> {
    Ok(Json(state.engine.deliveries().list_batches(trade_id).await?))
}

pub async fn get_delivery_progress(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<DeliveryProgress>> {
    Ok(Json(state.engine.deliveries().get_progress(trade_id).await?))
}
