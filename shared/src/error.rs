//! Workflow error kinds
//!
//! Every variant is recoverable at the caller's discretion; none of them
//! leaves partially applied state behind.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RejectedVoucher, TradeStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// The trade's current state does not permit the requested action
    #[error("Trade {trade_id} is {status}; cannot {action}")]
    Precondition {
        trade_id: Uuid,
        status: TradeStatus,
        action: &'static str,
    },

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Delivery of {requested_kg} kg exceeds remaining {remaining_kg} kg")]
    OverDelivery {
        requested_kg: Decimal,
        remaining_kg: Decimal,
    },

    #[error("Insufficient inventory: {available_kg} kg available, {required_kg} kg required")]
    InsufficientInventory {
        required_kg: Decimal,
        available_kg: Decimal,
        shortfall_kg: Decimal,
    },

    #[error("Insufficient voucher selection: short by {shortfall_kg} kg")]
    InsufficientSelection {
        shortfall_kg: Decimal,
        rejected: Vec<RejectedVoucher>,
    },

    #[error("Trade {trade_id} still has {amount_due} due")]
    PaymentPending { trade_id: Uuid, amount_due: Decimal },

    #[error("Concurrent modification of {resource}")]
    ConcurrentModification { resource: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn concurrent(resource: impl Into<String>) -> Self {
        WorkflowError::ConcurrentModification {
            resource: resource.into(),
        }
    }

    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Precondition { .. } => "PRECONDITION_FAILED",
            WorkflowError::Validation { .. } => "VALIDATION_ERROR",
            WorkflowError::OverDelivery { .. } => "OVER_DELIVERY",
            WorkflowError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            WorkflowError::InsufficientSelection { .. } => "INSUFFICIENT_SELECTION",
            WorkflowError::PaymentPending { .. } => "PAYMENT_PENDING",
            WorkflowError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            WorkflowError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Structured payload for the error body, when the kind carries one
    pub fn details(&self) -> Option<ErrorDetails> {
        match self {
            WorkflowError::OverDelivery {
                requested_kg,
                remaining_kg,
            } => Some(ErrorDetails {
                remaining_kg: Some(*remaining_kg),
                requested_kg: Some(*requested_kg),
                ..Default::default()
            }),
            WorkflowError::InsufficientInventory { shortfall_kg, .. } => Some(ErrorDetails {
                shortfall_kg: Some(*shortfall_kg),
                ..Default::default()
            }),
            WorkflowError::InsufficientSelection {
                shortfall_kg,
                rejected,
            } => Some(ErrorDetails {
                shortfall_kg: Some(*shortfall_kg),
                rejected_vouchers: rejected.clone(),
                ..Default::default()
            }),
            WorkflowError::PaymentPending { amount_due, .. } => Some(ErrorDetails {
                amount_due: Some(*amount_due),
                ..Default::default()
            }),
            WorkflowError::Precondition { status, .. } => Some(ErrorDetails {
                status: Some(*status),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TradeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall_kg: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_due: Option<Decimal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_vouchers: Vec<RejectedVoucher>,
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
