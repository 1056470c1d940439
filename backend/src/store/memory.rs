//! In-process store
//!
//! Backs tests and single-node deployments. The state mutex is only held for
//! the duration of one call and never across an await point; per-key
//! serialization of workflow operations happens above this layer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{
    DeliveryBatch, InventoryFilter, Invoice, InvoicePeriod, PeriodKey, Trade, Voucher,
    VoucherAllocation,
};
use uuid::Uuid;

use super::{
    trade_resource, FulfillmentStore, InventoryQuery, InvoiceDestination, StoreError, StoreResult,
};

#[derive(Default)]
struct MemoryState {
    trades: HashMap<Uuid, Trade>,
    batches: HashMap<Uuid, Vec<DeliveryBatch>>,
    allocations: HashMap<Uuid, VoucherAllocation>,
    vouchers: HashMap<Uuid, Voucher>,
    periods: HashMap<Uuid, InvoicePeriod>,
    /// Period ids per key, oldest first
    period_index: HashMap<PeriodKey, Vec<Uuid>>,
    invoices: HashMap<Uuid, Invoice>,
}

impl MemoryState {
    fn check_version(&self, trade: &Trade, expected_version: i64) -> StoreResult<()> {
        match self.trades.get(&trade.id) {
            None => Err(StoreError::NotFound(trade_resource(trade.id))),
            Some(stored) if stored.version != expected_version => {
                Err(StoreError::Conflict(trade_resource(trade.id)))
            }
            Some(_) => Ok(()),
        }
    }

    fn open_period_for(&self, key: &PeriodKey) -> Option<&InvoicePeriod> {
        self.period_index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.periods.get(id))
            .find(|p| p.is_open())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store lock poisoned".to_string()))
    }

    /// Deposit a voucher into the inventory pool
    pub fn insert_voucher(&self, voucher: Voucher) -> StoreResult<()> {
        self.state()?.vouchers.insert(voucher.id, voucher);
        Ok(())
    }

    pub fn voucher(&self, voucher_id: Uuid) -> StoreResult<Option<Voucher>> {
        Ok(self.state()?.vouchers.get(&voucher_id).cloned())
    }

    /// All periods ever stored for a customer
    pub fn periods_for_customer(&self, customer_id: Uuid) -> StoreResult<Vec<InvoicePeriod>> {
        let state = self.state()?;
        let mut periods: Vec<InvoicePeriod> = state
            .periods
            .values()
            .filter(|p| p.key.customer_id == customer_id)
            .cloned()
            .collect();
        periods.sort_by_key(|p| (p.key.boundary, p.opened_at));
        Ok(periods)
    }

    pub fn invoices_for_customer(&self, customer_id: Uuid) -> StoreResult<Vec<Invoice>> {
        let state = self.state()?;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.customer_id == customer_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.issued_at);
        Ok(invoices)
    }
}

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.trades.contains_key(&trade.id) {
            return Err(StoreError::Conflict(trade_resource(trade.id)));
        }
        if state.trades.values().any(|t| t.reference == trade.reference) {
            return Err(StoreError::Duplicate {
                field: "reference",
                value: trade.reference.clone(),
            });
        }
        state.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn get_trade(&self, trade_id: Uuid) -> StoreResult<Option<Trade>> {
        Ok(self.state()?.trades.get(&trade_id).cloned())
    }

    async fn update_trade(&self, trade: &Trade, expected_version: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_version(trade, expected_version)?;
        state.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn list_batches(&self, trade_id: Uuid) -> StoreResult<Vec<DeliveryBatch>> {
        Ok(self
            .state()?
            .batches
            .get(&trade_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_allocation(&self, trade_id: Uuid) -> StoreResult<Option<VoucherAllocation>> {
        Ok(self.state()?.allocations.get(&trade_id).cloned())
    }

    async fn get_vouchers(&self, voucher_ids: &[Uuid]) -> StoreResult<Vec<Voucher>> {
        let state = self.state()?;
        Ok(voucher_ids
            .iter()
            .filter_map(|id| state.vouchers.get(id).cloned())
            .collect())
    }

    async fn latest_period(&self, key: &PeriodKey) -> StoreResult<Option<InvoicePeriod>> {
        let state = self.state()?;
        if let Some(open) = state.open_period_for(key) {
            return Ok(Some(open.clone()));
        }
        Ok(state
            .period_index
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| state.periods.get(id))
            .cloned())
    }

    async fn get_period(&self, period_id: Uuid) -> StoreResult<Option<InvoicePeriod>> {
        Ok(self.state()?.periods.get(&period_id).cloned())
    }

    async fn list_due_periods(&self, before: NaiveDate) -> StoreResult<Vec<InvoicePeriod>> {
        let state = self.state()?;
        let mut due: Vec<InvoicePeriod> = state
            .periods
            .values()
            .filter(|p| p.is_open() && p.key.boundary < before)
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.key.boundary, p.opened_at));
        Ok(due)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self.state()?.invoices.get(&invoice_id).cloned())
    }

    async fn update_invoice_amount_due(
        &self,
        invoice_id: Uuid,
        expected_due: Decimal,
        new_due: Decimal,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", invoice_id)))?;
        if invoice.amount_due != expected_due {
            return Err(StoreError::Conflict(format!("invoice {}", invoice_id)));
        }
        invoice.amount_due = new_due;
        Ok(())
    }

    async fn commit_allocation(
        &self,
        trade: &Trade,
        expected_version: i64,
        allocation: &VoucherAllocation,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_version(trade, expected_version)?;

        for id in &allocation.voucher_ids {
            let voucher = state
                .vouchers
                .get(id)
                .ok_or_else(|| StoreError::NotFound(format!("voucher {}", id)))?;
            if voucher.allocated_to.is_some_and(|owner| owner != trade.id) {
                return Err(StoreError::Conflict(format!("voucher {}", id)));
            }
        }

        for id in &allocation.voucher_ids {
            if let Some(voucher) = state.vouchers.get_mut(id) {
                voucher.allocated_to = Some(trade.id);
            }
        }
        state.allocations.insert(trade.id, allocation.clone());
        state.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn commit_delivery(
        &self,
        trade: &Trade,
        expected_version: i64,
        batch: &DeliveryBatch,
        destination: &InvoiceDestination,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        state.check_version(trade, expected_version)?;

        let delivered = state
            .batches
            .get(&trade.id)
            .into_iter()
            .flatten()
            .try_fold(batch.net_weight_kg, |total, b| total.checked_add(b.net_weight_kg));
        if delivered.map_or(true, |total| total > trade.ordered_quantity_kg) {
            return Err(StoreError::Conflict(trade_resource(trade.id)));
        }

        match destination {
            InvoiceDestination::Issue(invoice) => {
                state.invoices.insert(invoice.id, invoice.clone());
            }
            InvoiceDestination::OpenPeriod(period) => {
                if state.open_period_for(&period.key).is_some() {
                    return Err(StoreError::Conflict(format!("invoice period {}", period.key)));
                }
                state
                    .period_index
                    .entry(period.key)
                    .or_default()
                    .push(period.id);
                state.periods.insert(period.id, period.clone());
            }
            InvoiceDestination::AttachToPeriod { period_id, value } => {
                let period = state
                    .periods
                    .get_mut(period_id)
                    .ok_or_else(|| StoreError::NotFound(format!("invoice period {}", period_id)))?;
                if !period.is_open() {
                    return Err(StoreError::Conflict(format!("invoice period {}", period.key)));
                }
                period
                    .attach(batch.id, *value)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            }
        }

        state
            .batches
            .entry(trade.id)
            .or_default()
            .push(batch.clone());
        state.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn commit_cancellation(
        &self,
        trade: &Trade,
        expected_version: i64,
    ) -> StoreResult<Vec<Uuid>> {
        let mut state = self.state()?;
        state.check_version(trade, expected_version)?;

        let mut released = Vec::new();
        for voucher in state.vouchers.values_mut() {
            if voucher.allocated_to == Some(trade.id) {
                voucher.allocated_to = None;
                released.push(voucher.id);
            }
        }
        released.sort();
        state.allocations.remove(&trade.id);
        state.trades.insert(trade.id, trade.clone());
        Ok(released)
    }

    async fn close_period(&self, period: &InvoicePeriod, invoice: &Invoice) -> StoreResult<()> {
        let mut state = self.state()?;
        let stored = state
            .periods
            .get(&period.id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice period {}", period.id)))?;
        if !stored.is_open() {
            return Err(StoreError::Conflict(format!("invoice period {}", period.key)));
        }
        state.periods.insert(period.id, period.clone());
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }
}

#[async_trait]
impl InventoryQuery for MemoryStore {
    async fn find_available_vouchers(&self, filter: &InventoryFilter) -> StoreResult<Vec<Voucher>> {
        let state = self.state()?;
        Ok(state
            .vouchers
            .values()
            .filter(|v| v.is_available() && v.matches(filter))
            .cloned()
            .collect())
    }
}
