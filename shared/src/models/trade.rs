//! Trade lifecycle models

use std::borrow::Cow;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{InventoryFilter, PaymentTerms};
use crate::validation::{check_price, check_quantity, MONEY_SCALE};

/// A grain trade tracked from draft to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    /// Human readable reference (e.g., "TRD-2026-1A2B3C4D")
    pub reference: String,
    /// Buyer; invoices are raised against this customer
    pub buyer_id: Uuid,
    pub supplier_id: Uuid,
    pub hub_id: Uuid,
    pub grain_type_id: Uuid,
    pub grade: String,
    /// Immutable once the trade leaves draft/rejected
    pub ordered_quantity_kg: Decimal,
    pub price_per_kg: Decimal,
    pub payment_terms: PaymentTerms,
    pub requires_financing: bool,
    pub financing_complete: bool,
    pub requires_voucher_allocation: bool,
    pub allocation_complete: bool,
    pub status: TradeStatus,
    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a trade in the fulfillment workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Draft,
    PendingApproval,
    Approved,
    PendingAllocation,
    ReadyForDelivery,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
    Rejected,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Draft => "draft",
            TradeStatus::PendingApproval => "pending_approval",
            TradeStatus::Approved => "approved",
            TradeStatus::PendingAllocation => "pending_allocation",
            TradeStatus::ReadyForDelivery => "ready_for_delivery",
            TradeStatus::InTransit => "in_transit",
            TradeStatus::Delivered => "delivered",
            TradeStatus::Completed => "completed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TradeStatus::Draft),
            "pending_approval" => Some(TradeStatus::PendingApproval),
            "approved" => Some(TradeStatus::Approved),
            "pending_allocation" => Some(TradeStatus::PendingAllocation),
            "ready_for_delivery" => Some(TradeStatus::ReadyForDelivery),
            "in_transit" => Some(TradeStatus::InTransit),
            "delivered" => Some(TradeStatus::Delivered),
            "completed" => Some(TradeStatus::Completed),
            "cancelled" => Some(TradeStatus::Cancelled),
            "rejected" => Some(TradeStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Cancelled)
    }

    /// Whether delivery batches may be recorded in this status
    pub fn accepts_deliveries(&self) -> bool {
        matches!(self, TradeStatus::ReadyForDelivery | TradeStatus::InTransit)
    }

    /// Edges of the lifecycle graph, ignoring trade-specific guards
    pub fn can_transition_to(&self, to: TradeStatus) -> bool {
        use TradeStatus::*;

        if to == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, to),
            (Draft, PendingApproval)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Draft)
                | (Rejected, Draft)
                | (Approved, PendingAllocation)
                | (Approved, ReadyForDelivery)
                | (PendingAllocation, ReadyForDelivery)
                | (ReadyForDelivery, InTransit)
                | (InTransit, Delivered)
                | (Delivered, Completed)
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied status change, emitted as a `StatusChanged` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub trade_id: Uuid,
    pub from: TradeStatus,
    pub to: TradeStatus,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Create a draft trade from validated input
    pub fn new_draft(input: CreateTradeInput, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        let reference = input
            .reference
            .unwrap_or_else(|| generate_trade_reference(now.year(), id));

        Self {
            id,
            reference,
            buyer_id: input.buyer_id,
            supplier_id: input.supplier_id,
            hub_id: input.hub_id,
            grain_type_id: input.grain_type_id,
            grade: input.grade,
            ordered_quantity_kg: input.ordered_quantity_kg,
            price_per_kg: input.price_per_kg,
            payment_terms: input.payment_terms,
            requires_financing: input.requires_financing,
            financing_complete: false,
            requires_voucher_allocation: input.requires_voucher_allocation,
            allocation_complete: false,
            status: TradeStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn inventory_filter(&self) -> InventoryFilter {
        InventoryFilter::new(self.hub_id, self.grain_type_id, self.grade.clone())
    }

    /// Invoice value of a delivered weight at this trade's price, rounded
    /// half away from zero to the money scale
    pub fn value_of(&self, net_weight_kg: Decimal) -> WorkflowResult<Decimal> {
        net_weight_kg
            .checked_mul(self.price_per_kg)
            .map(|value| {
                value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
            })
            .ok_or_else(|| {
                WorkflowError::validation("net_weight_kg", "Delivery value is out of range")
            })
    }

    fn financing_pending(&self) -> bool {
        self.requires_financing && !self.financing_complete
    }

    fn allocation_pending(&self) -> bool {
        self.requires_voucher_allocation && !self.allocation_complete
    }

    /// Where an approved trade moves on its own, if anywhere
    pub fn post_approval_target(&self) -> Option<TradeStatus> {
        match self.status {
            TradeStatus::Approved if self.financing_pending() => None,
            TradeStatus::Approved if self.requires_voucher_allocation => {
                Some(TradeStatus::PendingAllocation)
            }
            TradeStatus::Approved => Some(TradeStatus::ReadyForDelivery),
            TradeStatus::PendingAllocation if !self.allocation_pending() => {
                Some(TradeStatus::ReadyForDelivery)
            }
            _ => None,
        }
    }

    /// Apply one lifecycle edge, checking the graph and the trade's guards
    pub fn transition(
        &mut self,
        to: TradeStatus,
        action: &'static str,
        at: DateTime<Utc>,
    ) -> WorkflowResult<StatusChange> {
        let from = self.status;
        let trade_id = self.id;
        let precondition = || WorkflowError::Precondition {
            trade_id,
            status: from,
            action,
        };

        if !from.can_transition_to(to) {
            return Err(precondition());
        }

        let guarded = match (from, to) {
            (TradeStatus::Approved, TradeStatus::PendingAllocation) => {
                self.financing_pending() || !self.requires_voucher_allocation
            }
            (TradeStatus::Approved, TradeStatus::ReadyForDelivery) => {
                self.financing_pending() || self.allocation_pending()
            }
            (TradeStatus::PendingAllocation, TradeStatus::ReadyForDelivery) => {
                self.allocation_pending()
            }
            _ => false,
        };
        if guarded {
            return Err(precondition());
        }

        self.status = to;
        self.updated_at = at;
        Ok(StatusChange {
            trade_id: self.id,
            from,
            to,
            timestamp: at,
        })
    }

    /// Run the automatic advance out of `approved` as far as the guards allow.
    /// An allocation completed before financing carries straight through to
    /// `ready_for_delivery`.
    pub fn advance_after_approval(&mut self, at: DateTime<Utc>) -> WorkflowResult<Vec<StatusChange>> {
        let mut changes = Vec::new();
        while let Some(next) = self.post_approval_target() {
            changes.push(self.transition(next, "advance approved trade", at)?);
        }
        Ok(changes)
    }
}

/// Generate a trade reference
pub fn generate_trade_reference(year: i32, id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("TRD-{}-{}", year, &simple[..8])
}

/// Input for creating a draft trade
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTradeInput {
    #[validate(length(min = 1, max = 64))]
    pub reference: Option<String>,
    pub buyer_id: Uuid,
    pub supplier_id: Uuid,
    pub hub_id: Uuid,
    pub grain_type_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub grade: String,
    #[validate(custom = "validate_positive_kg")]
    pub ordered_quantity_kg: Decimal,
    #[validate(custom = "validate_non_negative_price")]
    pub price_per_kg: Decimal,
    pub payment_terms: PaymentTerms,
    #[serde(default)]
    pub requires_financing: bool,
    #[serde(default)]
    pub requires_voucher_allocation: bool,
}

/// Changes permitted while a trade is still in draft or rejected
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AmendTradeInput {
    #[validate(custom = "validate_positive_kg")]
    pub ordered_quantity_kg: Option<Decimal>,
    #[validate(custom = "validate_non_negative_price")]
    pub price_per_kg: Option<Decimal>,
    pub payment_terms: Option<PaymentTerms>,
    pub requires_financing: Option<bool>,
    pub requires_voucher_allocation: Option<bool>,
}

impl AmendTradeInput {
    pub fn apply(self, trade: &mut Trade) {
        if let Some(qty) = self.ordered_quantity_kg {
            trade.ordered_quantity_kg = qty;
        }
        if let Some(price) = self.price_per_kg {
            trade.price_per_kg = price;
        }
        if let Some(terms) = self.payment_terms {
            trade.payment_terms = terms;
        }
        if let Some(flag) = self.requires_financing {
            trade.requires_financing = flag;
        }
        if let Some(flag) = self.requires_voucher_allocation {
            trade.requires_voucher_allocation = flag;
        }
    }
}

fn limit_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_positive_kg(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("quantity_must_be_positive"));
    }
    check_quantity(*value).map_err(|msg| limit_error("quantity_out_of_range", msg))
}

fn validate_non_negative_price(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("price_must_not_be_negative"));
    }
    check_price(*value).map_err(|msg| limit_error("price_out_of_range", msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleType;

    fn draft(requires_financing: bool, requires_allocation: bool) -> Trade {
        Trade::new_draft(
            CreateTradeInput {
                reference: None,
                buyer_id: Uuid::new_v4(),
                supplier_id: Uuid::new_v4(),
                hub_id: Uuid::new_v4(),
                grain_type_id: Uuid::new_v4(),
                grade: "G1".to_string(),
                ordered_quantity_kg: Decimal::from(1000),
                price_per_kg: Decimal::from(2),
                payment_terms: PaymentTerms::new(ScheduleType::Weekly, 7),
                requires_financing,
                requires_voucher_allocation: requires_allocation,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_cancel_reachable_from_every_non_terminal_state() {
        use TradeStatus::*;
        for status in [
            Draft,
            PendingApproval,
            Approved,
            PendingAllocation,
            ReadyForDelivery,
            InTransit,
            Delivered,
            Rejected,
        ] {
            assert!(status.can_transition_to(Cancelled), "{status}");
        }
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_rejected_only_from_pending_approval() {
        use TradeStatus::*;
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(!Draft.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(Draft));
        assert!(!Rejected.can_transition_to(PendingApproval));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        let status = TradeStatus::ReadyForDelivery;
        assert_eq!(TradeStatus::from_str(status.as_str()), Some(status));
        assert_eq!(TradeStatus::from_str("shipped"), None);
    }

    #[test]
    fn test_approval_advances_to_allocation_when_required() {
        let mut trade = draft(false, true);
        trade.status = TradeStatus::Approved;

        let changes = trade.advance_after_approval(Utc::now()).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(trade.status, TradeStatus::PendingAllocation);
    }

    #[test]
    fn test_approval_holds_while_financing_pending() {
        let mut trade = draft(true, false);
        trade.status = TradeStatus::Approved;

        assert!(trade.advance_after_approval(Utc::now()).unwrap().is_empty());
        assert_eq!(trade.status, TradeStatus::Approved);

        trade.financing_complete = true;
        trade.advance_after_approval(Utc::now()).unwrap();
        assert_eq!(trade.status, TradeStatus::ReadyForDelivery);
    }

    #[test]
    fn test_ready_for_delivery_blocked_until_allocation_complete() {
        let mut trade = draft(false, true);
        trade.status = TradeStatus::PendingAllocation;

        let err = trade
            .transition(TradeStatus::ReadyForDelivery, "release", Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Precondition { .. }));
        assert_eq!(trade.status, TradeStatus::PendingAllocation);

        trade.allocation_complete = true;
        trade
            .transition(TradeStatus::ReadyForDelivery, "release", Utc::now())
            .unwrap();
        assert_eq!(trade.status, TradeStatus::ReadyForDelivery);
    }

    #[test]
    fn test_allocation_before_financing_carries_through() {
        let mut trade = draft(true, true);
        trade.status = TradeStatus::Approved;
        trade.allocation_complete = true;
        trade.financing_complete = true;

        let changes = trade.advance_after_approval(Utc::now()).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].to, TradeStatus::PendingAllocation);
        assert_eq!(trade.status, TradeStatus::ReadyForDelivery);
    }

    #[test]
    fn test_approved_cannot_skip_allocation() {
        let mut trade = draft(false, true);
        trade.status = TradeStatus::Approved;

        assert!(trade
            .transition(TradeStatus::ReadyForDelivery, "release", Utc::now())
            .is_err());
    }

    #[test]
    fn test_generated_reference_format() {
        let id = Uuid::parse_str("1a2b3c4d-0000-0000-0000-000000000000").unwrap();
        assert_eq!(generate_trade_reference(2026, id), "TRD-2026-1A2B3C4D");
    }

    #[test]
    fn test_create_input_rejects_zero_quantity() {
        let input = CreateTradeInput {
            reference: None,
            buyer_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            hub_id: Uuid::new_v4(),
            grain_type_id: Uuid::new_v4(),
            grade: "G2".to_string(),
            ordered_quantity_kg: Decimal::ZERO,
            price_per_kg: Decimal::ONE,
            payment_terms: PaymentTerms::immediate(0),
            requires_financing: false,
            requires_voucher_allocation: false,
        };

        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("ordered_quantity_kg"));
    }

    #[test]
    fn test_create_input_rejects_quantity_and_price_beyond_limits() {
        let mut input = CreateTradeInput {
            reference: None,
            buyer_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            hub_id: Uuid::new_v4(),
            grain_type_id: Uuid::new_v4(),
            grade: "G2".to_string(),
            ordered_quantity_kg: Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0),
            price_per_kg: Decimal::from(10_000_000_000i64),
            payment_terms: PaymentTerms::immediate(0),
            requires_financing: false,
            requires_voucher_allocation: false,
        };

        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("ordered_quantity_kg"));
        assert!(errors.field_errors().contains_key("price_per_kg"));

        input.ordered_quantity_kg = Decimal::new(1_2345, 4);
        input.price_per_kg = Decimal::new(45, 2);
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("ordered_quantity_kg"));
    }

    #[test]
    fn test_value_of_rounds_to_money_scale() {
        let mut trade = draft(false, false);
        trade.price_per_kg = Decimal::new(45_555, 5);
        assert_eq!(trade.value_of(Decimal::from(1)), Ok(Decimal::new(4556, 4)));
    }

    #[test]
    fn test_value_of_overflow_is_a_validation_error() {
        let mut trade = draft(false, false);
        trade.price_per_kg = Decimal::MAX;
        let err = trade.value_of(Decimal::from(2)).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "net_weight_kg"));
    }
}
