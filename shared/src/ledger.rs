//! Ordered vs. delivered quantity per trade
//!
//! Delivered quantity is always derived from the recorded batches; the ledger
//! never holds a separately stored counter.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{DeliveryBatch, DeliveryProgress};

#[derive(Debug, Clone, PartialEq)]
pub struct QuantityLedger {
    trade_id: Uuid,
    ordered_kg: Decimal,
    delivered_kg: Decimal,
    batch_count: usize,
}

/// Accepted reservation against a trade's remaining quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub net_weight_kg: Decimal,
    pub is_first_batch: bool,
    pub remaining_after_kg: Decimal,
}

impl Reservation {
    pub fn completes_order(&self) -> bool {
        self.remaining_after_kg.is_zero()
    }
}

impl QuantityLedger {
    pub fn from_batches(trade_id: Uuid, ordered_kg: Decimal, batches: &[DeliveryBatch]) -> Self {
        let delivered_kg = batches
            .iter()
            .fold(Decimal::ZERO, |total, b| total.saturating_add(b.net_weight_kg));
        Self {
            trade_id,
            ordered_kg,
            delivered_kg,
            batch_count: batches.len(),
        }
    }

    pub fn ordered_kg(&self) -> Decimal {
        self.ordered_kg
    }

    pub fn delivered_kg(&self) -> Decimal {
        self.delivered_kg
    }

    pub fn remaining_kg(&self) -> Decimal {
        self.ordered_kg.saturating_sub(self.delivered_kg)
    }

    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    pub fn is_fully_delivered(&self) -> bool {
        self.delivered_kg == self.ordered_kg
    }

    /// Check a batch against the remaining quantity; no partial acceptance
    pub fn reserve(&self, net_weight_kg: Decimal) -> WorkflowResult<Reservation> {
        if net_weight_kg <= Decimal::ZERO {
            return Err(WorkflowError::validation(
                "net_weight_kg",
                "Net weight must be positive",
            ));
        }

        let remaining = self.remaining_kg();
        if net_weight_kg > remaining {
            return Err(WorkflowError::OverDelivery {
                requested_kg: net_weight_kg,
                remaining_kg: remaining,
            });
        }

        Ok(Reservation {
            net_weight_kg,
            is_first_batch: self.batch_count == 0,
            remaining_after_kg: remaining - net_weight_kg,
        })
    }

    /// Ledger state after a reservation is committed
    pub fn commit(&mut self, reservation: &Reservation) {
        self.delivered_kg = self.delivered_kg.saturating_add(reservation.net_weight_kg);
        self.batch_count += 1;
    }

    pub fn progress(&self) -> DeliveryProgress {
        DeliveryProgress {
            trade_id: self.trade_id,
            ordered_kg: self.ordered_kg,
            delivered_kg: self.delivered_kg,
            remaining_kg: self.remaining_kg(),
            batch_count: self.batch_count,
            is_fully_delivered: self.is_fully_delivered(),
        }
    }
}
