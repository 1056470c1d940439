//! Delivery batch (GRN) models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{Invoice, InvoiceTarget, StatusChange};

/// One physical consignment delivered against a trade
///
/// Batches are immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub id: Uuid,
    pub trade_id: Uuid,
    /// Goods Received Note number
    pub grn_number: String,
    pub gross_weight_kg: Decimal,
    pub tare_weight_kg: Decimal,
    /// Gross minus tare, always positive
    pub net_weight_kg: Decimal,
    /// Net weight at the trade's price
    pub value: Decimal,
    pub loading_date: NaiveDate,
    pub delivery_date: NaiveDate,
    pub vehicle_number: String,
    pub driver_name: String,
    pub dispatched_by: String,
    pub received_by: String,
    pub received_at: Option<DateTime<Utc>>,
    /// Where this batch is invoiced
    pub invoice_ref: InvoiceRef,
    pub created_at: DateTime<Utc>,
}

/// Invoice destination of a batch: an issued invoice, or an open period
/// that acts as the pending-invoice marker until it closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum InvoiceRef {
    Invoice(Uuid),
    Period(Uuid),
}

/// Input for recording a delivery batch
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDeliveryBatch {
    #[validate(length(min = 1, max = 64))]
    pub grn_number: String,
    pub gross_weight_kg: Decimal,
    pub tare_weight_kg: Decimal,
    pub loading_date: NaiveDate,
    pub delivery_date: NaiveDate,
    #[validate(length(min = 1, max = 32))]
    pub vehicle_number: String,
    #[validate(length(min = 1, max = 128))]
    pub driver_name: String,
    #[validate(length(min = 1, max = 128))]
    pub dispatched_by: String,
    #[validate(length(min = 1, max = 128))]
    pub received_by: String,
    pub received_at: Option<DateTime<Utc>>,
}

impl NewDeliveryBatch {
    pub fn net_weight_kg(&self) -> Decimal {
        self.gross_weight_kg - self.tare_weight_kg
    }
}

/// Delivery progress of one trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProgress {
    pub trade_id: Uuid,
    pub ordered_kg: Decimal,
    pub delivered_kg: Decimal,
    pub remaining_kg: Decimal,
    pub batch_count: usize,
    pub is_fully_delivered: bool,
}

/// Outcome of recording a delivery batch
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub batch: DeliveryBatch,
    pub invoice_target: InvoiceTarget,
    /// Set when the batch produced an invoice inside the same call
    pub issued_invoice: Option<Invoice>,
    pub status_changes: Vec<StatusChange>,
    pub progress: DeliveryProgress,
}
