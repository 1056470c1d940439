//! Invoice and consolidation period HTTP handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{Invoice, InvoicePeriod, InvoiceTarget, PaymentTerms, ScheduleType};
use uuid::Uuid;

use crate::error::AppResult;
use crate::AppState;

/// Query parameters for previewing an invoice target
#[derive(Debug, Deserialize)]
pub struct InvoiceTargetQuery {
    pub customer_id: Uuid,
    pub schedule: ScheduleType,
    pub days: u32,
    pub delivery_date: NaiveDate,
}

/// Preview where a delivery would be invoiced
pub async fn get_invoice_target(
    State(state): State<AppState>,
    Query(query): Query<InvoiceTargetQuery>,
) -> AppResult<Json<InvoiceTarget>> {
    let terms = PaymentTerms::new(query.schedule, query.days);
    let target = state
        .engine
        .invoicing()
        .resolve_target(query.customer_id, &terms, query.delivery_date)
        .await?;
    Ok(Json(target))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(state.engine.invoicing().get_invoice(invoice_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
}

pub async fn record_invoice_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(input): Json<RecordPaymentInput>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(
        state
            .engine
            .invoicing()
            .record_payment(invoice_id, input.amount)
            .await?,
    ))
}

pub async fn get_invoice_period(
    State(state): State<AppState>,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<InvoicePeriod>> {
    Ok(Json(state.engine.invoicing().get_period(period_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseDuePeriodsInput {
    /// Defaults to now
    pub as_of: Option<DateTime<Utc>>,
}

/// Run the period-closing sweep on demand
pub async fn close_due_periods(
    State(state): State<AppState>,
    input: Option<Json<CloseDuePeriodsInput>>,
) -> AppResult<Json<Vec<Invoice>>> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let as_of = input.as_of.unwrap_or_else(Utc::now);
    Ok(Json(state.engine.invoicing().close_due_periods(as_of).await?))
}
