//! Validation utilities for delivery batches and trade input

use chrono::NaiveDate;
use rust_decimal::Decimal;
use validator::{Validate, ValidationErrors};

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::NewDeliveryBatch;

// ============================================================================
// Numeric Limits
// ============================================================================

/// Largest quantity (kg) accepted on a trade, batch or voucher
pub const MAX_QUANTITY_KG: i64 = 1_000_000_000;

/// Largest price per kg accepted on a trade
pub const MAX_PRICE_PER_KG: i64 = 1_000_000;

/// Decimal places kept for weights
pub const QUANTITY_SCALE: u32 = 3;

/// Decimal places kept for prices and money amounts
pub const MONEY_SCALE: u32 = 4;

fn significant_scale(value: Decimal) -> u32 {
    value.normalize().scale()
}

/// Reject quantities outside the stored range or precision
pub fn check_quantity(value: Decimal) -> Result<(), &'static str> {
    if significant_scale(value) > QUANTITY_SCALE {
        return Err("Quantity supports at most 3 decimal places");
    }
    if value > Decimal::from(MAX_QUANTITY_KG) {
        return Err("Quantity exceeds 1000000000 kg");
    }
    Ok(())
}

/// Reject prices outside the stored range or precision
pub fn check_price(value: Decimal) -> Result<(), &'static str> {
    if significant_scale(value) > MONEY_SCALE {
        return Err("Price supports at most 4 decimal places");
    }
    if value > Decimal::from(MAX_PRICE_PER_KG) {
        return Err("Price exceeds 1000000 per kg");
    }
    Ok(())
}

/// Reject money amounts with more precision than an invoice stores
pub fn check_money_scale(value: Decimal) -> Result<(), &'static str> {
    if significant_scale(value) > MONEY_SCALE {
        return Err("Amount supports at most 4 decimal places");
    }
    Ok(())
}

// ============================================================================
// Delivery Validations
// ============================================================================

/// Validate scale weights and return the net weight (gross - tare)
pub fn validate_weights(gross_kg: Decimal, tare_kg: Decimal) -> Result<Decimal, &'static str> {
    if gross_kg < Decimal::ZERO || tare_kg < Decimal::ZERO {
        return Err("Weights cannot be negative");
    }
    check_quantity(gross_kg)?;
    check_quantity(tare_kg)?;
    let net = gross_kg - tare_kg;
    if net <= Decimal::ZERO {
        return Err("Net weight must be positive");
    }
    Ok(net)
}

/// Delivery cannot precede loading
pub fn validate_delivery_dates(loading: NaiveDate, delivery: NaiveDate) -> Result<(), &'static str> {
    if delivery < loading {
        return Err("Delivery date cannot be before loading date");
    }
    Ok(())
}

/// Full precondition check for a batch; returns its net weight
pub fn validate_delivery_batch(batch: &NewDeliveryBatch) -> WorkflowResult<Decimal> {
    batch.validate().map_err(|e| first_field_error(&e))?;

    let net = validate_weights(batch.gross_weight_kg, batch.tare_weight_kg)
        .map_err(|msg| WorkflowError::validation("net_weight_kg", msg))?;
    validate_delivery_dates(batch.loading_date, batch.delivery_date)
        .map_err(|msg| WorkflowError::validation("delivery_date", msg))?;

    Ok(net)
}

// ============================================================================
// General
// ============================================================================

/// Collapse `validator` output into the first offending field
pub fn first_field_error(errors: &ValidationErrors) -> WorkflowError {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);

    match fields.first() {
        Some((field, errs)) => {
            let message = errs
                .first()
                .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                .or_else(|| errs.first().map(|e| e.code.to_string()))
                .unwrap_or_else(|| "invalid".to_string());
            WorkflowError::validation(*field, message)
        }
        None => WorkflowError::validation("input", errors.to_string()),
    }
}
