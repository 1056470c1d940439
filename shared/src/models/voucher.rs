//! Inventory voucher and allocation models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::InventoryFilter;

/// A warehouse receipt for stored grain, allocatable to one trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub voucher_number: String,
    pub hub_id: Uuid,
    pub grain_type_id: Uuid,
    pub grade: String,
    pub quantity_kg: Decimal,
    pub deposit_date: NaiveDate,
    /// Trade that exclusively owns this voucher, if any
    pub allocated_to: Option<Uuid>,
}

impl Voucher {
    pub fn is_available(&self) -> bool {
        self.allocated_to.is_none()
    }

    pub fn matches(&self, filter: &InventoryFilter) -> bool {
        self.hub_id == filter.hub_id
            && self.grain_type_id == filter.grain_type_id
            && self.grade == filter.grade
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    /// Oldest deposits first
    Auto,
    /// Caller-chosen voucher set
    Manual,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Auto => "auto",
            AllocationMode::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(AllocationMode::Auto),
            "manual" => Some(AllocationMode::Manual),
            _ => None,
        }
    }
}

/// Binding of vouchers to a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherAllocation {
    pub trade_id: Uuid,
    pub mode: AllocationMode,
    pub voucher_ids: Vec<Uuid>,
    pub total_allocated_kg: Decimal,
    pub allocated_at: DateTime<Utc>,
}

/// Request body for allocating vouchers to a trade
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationRequest {
    pub mode: AllocationMode,
    #[serde(default)]
    pub voucher_ids: Option<Vec<Uuid>>,
}

impl AllocationRequest {
    pub fn auto() -> Self {
        Self {
            mode: AllocationMode::Auto,
            voucher_ids: None,
        }
    }

    pub fn manual(voucher_ids: Vec<Uuid>) -> Self {
        Self {
            mode: AllocationMode::Manual,
            voucher_ids: Some(voucher_ids),
        }
    }
}

/// Outcome of a committed allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationResult {
    pub allocation: VoucherAllocation,
    pub required_kg: Decimal,
    /// Allocated quantity above the requirement (whole vouchers are owned)
    pub surplus_kg: Decimal,
}

/// A manually selected voucher that could not be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedVoucher {
    pub voucher_id: Uuid,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotFound,
    AlreadyAllocated,
    FilterMismatch,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotFound => write!(f, "not found"),
            RejectionReason::AlreadyAllocated => write!(f, "already allocated"),
            RejectionReason::FilterMismatch => write!(f, "hub, grain type or grade mismatch"),
        }
    }
}
