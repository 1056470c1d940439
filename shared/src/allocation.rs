//! Voucher selection rules
//!
//! Pure selection logic only. Committing a selection (and the exclusivity it
//! implies) is the storage layer's job.

use std::collections::HashSet;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{RejectedVoucher, RejectionReason, Voucher};
use crate::types::InventoryFilter;

/// Vouchers chosen to cover a required quantity
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub voucher_ids: Vec<Uuid>,
    pub total_kg: Decimal,
}

/// Oldest deposit first; voucher number and id break ties deterministically
pub fn sort_fifo(vouchers: &mut [Voucher]) {
    vouchers.sort_by(|a, b| {
        a.deposit_date
            .cmp(&b.deposit_date)
            .then_with(|| a.voucher_number.cmp(&b.voucher_number))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Greedy FIFO selection: the shortest deposit-ordered prefix whose total
/// reaches `required_kg`. Fails without selecting anything when the pool is
/// short.
pub fn select_fifo(
    candidates: &[Voucher],
    filter: &InventoryFilter,
    required_kg: Decimal,
) -> WorkflowResult<Selection> {
    let mut pool: Vec<Voucher> = candidates
        .iter()
        .filter(|v| v.is_available() && v.matches(filter))
        .cloned()
        .collect();
    sort_fifo(&mut pool);

    let mut selection = Selection {
        voucher_ids: Vec::new(),
        total_kg: Decimal::ZERO,
    };
    for voucher in &pool {
        if selection.total_kg >= required_kg {
            break;
        }
        selection.voucher_ids.push(voucher.id);
        selection.total_kg = selection.total_kg.saturating_add(voucher.quantity_kg);
    }

    if selection.total_kg < required_kg {
        return Err(WorkflowError::InsufficientInventory {
            required_kg,
            available_kg: selection.total_kg,
            shortfall_kg: required_kg - selection.total_kg,
        });
    }

    Ok(selection)
}

/// Validate a caller-chosen voucher set against the trade.
///
/// `found` holds whatever the store returned for `requested`; ids missing
/// from it are reported as not found. Vouchers already owned by
/// `trade_id` are not counted as conflicts.
pub fn validate_manual(
    requested: &[Uuid],
    found: &[Voucher],
    filter: &InventoryFilter,
    trade_id: Uuid,
    required_kg: Decimal,
) -> WorkflowResult<Selection> {
    let mut seen = HashSet::new();
    let mut rejected = Vec::new();
    let mut selection = Selection {
        voucher_ids: Vec::new(),
        total_kg: Decimal::ZERO,
    };

    for id in requested.iter().filter(|id| seen.insert(**id)) {
        let reason = match found.iter().find(|v| v.id == *id) {
            None => Some(RejectionReason::NotFound),
            Some(v) if v.allocated_to.is_some_and(|owner| owner != trade_id) => {
                Some(RejectionReason::AlreadyAllocated)
            }
            Some(v) if !v.matches(filter) => Some(RejectionReason::FilterMismatch),
            Some(v) => {
                selection.voucher_ids.push(v.id);
                selection.total_kg = selection.total_kg.saturating_add(v.quantity_kg);
                None
            }
        };
        if let Some(reason) = reason {
            rejected.push(RejectedVoucher {
                voucher_id: *id,
                reason,
            });
        }
    }

    let shortfall_kg = (required_kg - selection.total_kg).max(Decimal::ZERO);
    if !rejected.is_empty() || shortfall_kg > Decimal::ZERO {
        return Err(WorkflowError::InsufficientSelection {
            shortfall_kg,
            rejected,
        });
    }

    Ok(selection)
}
