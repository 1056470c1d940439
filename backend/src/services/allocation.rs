//! Voucher allocator
//!
//! Selection is pure (`shared::allocation`); exclusivity is enforced by the
//! store commit, which fails as a whole if any chosen voucher was taken in
//! the meantime. Auto allocation re-plans against a fresh snapshot when that
//! happens, so the first committer wins and the loser never counts a voucher
//! it does not own.

use chrono::Utc;
use shared::allocation::{select_fifo, validate_manual, Selection};
use shared::{
    AllocationMode, AllocationRequest, AllocationResult, Trade, TradeStatus, VoucherAllocation,
    WorkflowError,
};
use uuid::Uuid;

use super::{next_version, Engine};
use crate::error::{AppError, AppResult};
use crate::store::{trade_resource, StoreError};

#[derive(Clone)]
pub struct VoucherAllocator {
    engine: Engine,
}

impl VoucherAllocator {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Allocate vouchers covering the trade's ordered quantity.
    ///
    /// Nothing is persisted unless the whole selection commits. On success
    /// the trade is marked allocation-complete and advances to
    /// `ready_for_delivery` when its other guards allow.
    pub async fn allocate(
        &self,
        trade_id: Uuid,
        request: AllocationRequest,
    ) -> AppResult<AllocationResult> {
        let _guard = self.engine.locks.lock_trade(trade_id).await?;

        let max_attempts = match request.mode {
            AllocationMode::Auto => self.engine.settings.allocation_max_attempts.max(1),
            AllocationMode::Manual => 1,
        };

        let mut attempt = 1;
        loop {
            let trade = self.engine.load_trade(trade_id).await?;
            check_allocatable(&trade)?;

            let selection = self.select(&trade, &request).await?;
            let required_kg = trade.ordered_quantity_kg;
            let now = Utc::now();

            let allocation = VoucherAllocation {
                trade_id,
                mode: request.mode,
                voucher_ids: selection.voucher_ids,
                total_allocated_kg: selection.total_kg,
                allocated_at: now,
            };

            let mut next = trade;
            next.allocation_complete = true;
            next.updated_at = now;
            let status_changes = next.advance_after_approval(now)?;
            let expected = next_version(&mut next);

            match self
                .engine
                .store
                .commit_allocation(&next, expected, &allocation)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        %trade_id,
                        mode = request.mode.as_str(),
                        vouchers = allocation.voucher_ids.len(),
                        allocated_kg = %allocation.total_allocated_kg,
                        attempt,
                        "Vouchers allocated"
                    );
                    self.engine.publish_changes(&status_changes);
                    let surplus_kg = allocation.total_allocated_kg - required_kg;
                    return Ok(AllocationResult {
                        allocation,
                        required_kg,
                        surplus_kg,
                    });
                }
                Err(StoreError::Conflict(resource)) if attempt < max_attempts => {
                    tracing::warn!(%trade_id, %resource, attempt, "Allocation lost a race; re-planning");
                    attempt += 1;
                }
                Err(StoreError::Conflict(resource)) => {
                    tracing::warn!(%trade_id, %resource, attempt, "Allocation commit rejected");
                    return Err(WorkflowError::concurrent(resource).into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_allocation(&self, trade_id: Uuid) -> AppResult<VoucherAllocation> {
        self.engine
            .store
            .get_allocation(trade_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("allocation for {}", trade_resource(trade_id))))
    }

    async fn select(&self, trade: &Trade, request: &AllocationRequest) -> AppResult<Selection> {
        let filter = trade.inventory_filter();
        let required_kg = trade.ordered_quantity_kg;

        let selection = match request.mode {
            AllocationMode::Auto => {
                let candidates = self.engine.inventory.find_available_vouchers(&filter).await?;
                select_fifo(&candidates, &filter, required_kg)?
            }
            AllocationMode::Manual => {
                let requested = match request.voucher_ids.as_deref() {
                    Some(ids) if !ids.is_empty() => ids,
                    _ => {
                        return Err(WorkflowError::validation(
                            "voucher_ids",
                            "Manual allocation requires at least one voucher",
                        )
                        .into())
                    }
                };
                let found = self.engine.store.get_vouchers(requested).await?;
                validate_manual(requested, &found, &filter, trade.id, required_kg)?
            }
        };

        tracing::debug!(
            trade_id = %trade.id,
            selected = selection.voucher_ids.len(),
            total_kg = %selection.total_kg,
            "Voucher selection planned"
        );
        Ok(selection)
    }
}

fn check_allocatable(trade: &Trade) -> Result<(), WorkflowError> {
    let open = matches!(
        trade.status,
        TradeStatus::Approved | TradeStatus::PendingAllocation
    );
    if !open || !trade.requires_voucher_allocation || trade.allocation_complete {
        return Err(WorkflowError::Precondition {
            trade_id: trade.id,
            status: trade.status,
            action: "allocate vouchers",
        });
    }
    Ok(())
}
