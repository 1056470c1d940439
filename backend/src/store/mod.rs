//! Persistence and inventory collaborators
//!
//! The engine never touches storage directly; it goes through
//! [`FulfillmentStore`] and [`InventoryQuery`]. Every composite `commit_*`
//! call is all-or-nothing: on any error nothing it describes is visible.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{
    DeliveryBatch, InventoryFilter, Invoice, InvoicePeriod, PeriodKey, Trade, Voucher,
    VoucherAllocation,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A compare-and-set or exclusivity check failed; safe to retry
    #[error("Conflicting write to {0}")]
    Conflict(String),

    /// A caller-supplied value that must be unique is already taken
    #[error("{field} {value} already exists")]
    Duplicate { field: &'static str, value: String },

    #[error("{0} not found")]
    NotFound(String),

    /// A stored value could not be mapped back onto the domain model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Where the invoice side of a delivery commit lands
#[derive(Debug, Clone, PartialEq)]
pub enum InvoiceDestination {
    /// Insert an invoice issued with the delivery
    Issue(Invoice),
    /// Insert a newly opened period that already holds the batch; fails if
    /// another open period exists for the same key
    OpenPeriod(InvoicePeriod),
    /// Append the batch to an existing period; fails unless it is still open
    AttachToPeriod { period_id: Uuid, value: Decimal },
}

/// Persistence interface for trades, batches, allocations, periods and invoices.
///
/// Trade writes take the version the caller loaded; the trade passed in
/// already carries the next version.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()>;

    async fn get_trade(&self, trade_id: Uuid) -> StoreResult<Option<Trade>>;

    async fn update_trade(&self, trade: &Trade, expected_version: i64) -> StoreResult<()>;

    /// Batches of a trade in insertion order
    async fn list_batches(&self, trade_id: Uuid) -> StoreResult<Vec<DeliveryBatch>>;

    async fn get_allocation(&self, trade_id: Uuid) -> StoreResult<Option<VoucherAllocation>>;

    /// Vouchers by id; unknown ids are simply absent from the result
    async fn get_vouchers(&self, voucher_ids: &[Uuid]) -> StoreResult<Vec<Voucher>>;

    /// The open period for `key`, or else the most recently closed one
    async fn latest_period(&self, key: &PeriodKey) -> StoreResult<Option<InvoicePeriod>>;

    async fn get_period(&self, period_id: Uuid) -> StoreResult<Option<InvoicePeriod>>;

    /// Open periods whose boundary is strictly before `before`
    async fn list_due_periods(&self, before: NaiveDate) -> StoreResult<Vec<InvoicePeriod>>;

    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>>;

    /// Compare-and-set on the invoice's amount due
    async fn update_invoice_amount_due(
        &self,
        invoice_id: Uuid,
        expected_due: Decimal,
        new_due: Decimal,
    ) -> StoreResult<()>;

    /// Mark every voucher in `allocation` as owned by the trade, record the
    /// allocation and write the trade
    async fn commit_allocation(
        &self,
        trade: &Trade,
        expected_version: i64,
        allocation: &VoucherAllocation,
    ) -> StoreResult<()>;

    /// Insert the batch, apply its invoice destination and write the trade.
    /// Also re-checks that the trade's batches stay within its order.
    async fn commit_delivery(
        &self,
        trade: &Trade,
        expected_version: i64,
        batch: &DeliveryBatch,
        destination: &InvoiceDestination,
    ) -> StoreResult<()>;

    /// Write the cancelled trade and release its vouchers; returns the
    /// released voucher ids
    async fn commit_cancellation(&self, trade: &Trade, expected_version: i64)
        -> StoreResult<Vec<Uuid>>;

    /// Persist a closed period together with the invoice it issued; fails
    /// unless the stored period is still open
    async fn close_period(&self, period: &InvoicePeriod, invoice: &Invoice) -> StoreResult<()>;
}

/// Inventory collaborator
#[async_trait]
pub trait InventoryQuery: Send + Sync {
    /// Unallocated vouchers matching hub, grain type and grade
    async fn find_available_vouchers(&self, filter: &InventoryFilter) -> StoreResult<Vec<Voucher>>;
}

pub(crate) fn trade_resource(trade_id: Uuid) -> String {
    format!("trade {}", trade_id)
}
