//! Trade lifecycle HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::{
    AllocationRequest, AllocationResult, AmendTradeInput, CreateTradeInput, Trade,
    VoucherAllocation,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::trade::TransitionOutcome;
use crate::AppState;

/// Create a draft trade
pub async fn create_trade(
    State(state): State<AppState>,
    Json(input): Json<CreateTradeInput>,
) -> AppResult<(StatusCode, Json<Trade>)> {
    let trade = state.engine.trades().create(input).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

pub async fn get_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<Trade>> {
    Ok(Json(state.engine.trades().get(trade_id).await?))
}

/// Amend a draft or rejected trade
pub async fn amend_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Json(input): Json<AmendTradeInput>,
) -> AppResult<Json<Trade>> {
    Ok(Json(state.engine.trades().amend(trade_id, input).await?))
}

pub async fn submit_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().submit(trade_id).await?))
}

pub async fn approve_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().approve(trade_id).await?))
}

pub async fn reject_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().reject(trade_id).await?))
}

pub async fn return_trade_to_draft(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().return_to_draft(trade_id).await?))
}

pub async fn cancel_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().cancel(trade_id).await?))
}

pub async fn mark_financing_complete(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(
        state.engine.trades().mark_financing_complete(trade_id).await?,
    ))
}

pub async fn release_for_delivery(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(
        state.engine.trades().release_for_delivery(trade_id).await?,
    ))
}

pub async fn complete_trade(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<TransitionOutcome>> {
    Ok(Json(state.engine.trades().complete(trade_id).await?))
}

/// Allocate inventory vouchers to a trade (FIFO or manual)
pub async fn allocate_vouchers(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Json(request): Json<AllocationRequest>,
) -> AppResult<Json<AllocationResult>> {
    Ok(Json(
        state
            .engine
            .trades()
            .allocate_vouchers(trade_id, request)
            .await?,
    ))
}

pub async fn get_allocation(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
) -> AppResult<Json<VoucherAllocation>> {
    Ok(Json(state.engine.allocator().get_allocation(trade_id).await?))
}
