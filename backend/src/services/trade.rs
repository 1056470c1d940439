//! Trade lifecycle service
//!
//! Applies state machine transitions under the trade's lock and persists
//! each one with a version check. Status changes are published only after
//! the write that made them durable.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    AllocationRequest, AllocationResult, AmendTradeInput, CreateTradeInput, StatusChange, Trade,
    TradeStatus, WorkflowError, WorkflowResult,
};
use uuid::Uuid;
use validator::Validate;

use super::{next_version, Engine};
use crate::error::{AppError, AppResult};

/// A trade after a lifecycle operation, with the changes it went through
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransitionOutcome {
    pub trade: Trade,
    pub status_changes: Vec<StatusChange>,
}

#[derive(Clone)]
pub struct TradeService {
    engine: Engine,
}

impl TradeService {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Create a trade in draft
    pub async fn create(&self, input: CreateTradeInput) -> AppResult<Trade> {
        input.validate()?;

        let trade = Trade::new_draft(input, Utc::now());
        self.engine.store.insert_trade(&trade).await?;

        tracing::info!(trade_id = %trade.id, reference = %trade.reference, "Trade created");
        Ok(trade)
    }

    pub async fn get(&self, trade_id: Uuid) -> AppResult<Trade> {
        self.engine.load_trade(trade_id).await
    }

    /// Change commercial terms while the trade is still in draft or rejected
    pub async fn amend(&self, trade_id: Uuid, input: AmendTradeInput) -> AppResult<Trade> {
        input.validate()?;

        let outcome = self
            .apply(trade_id, move |trade, at| {
                if !matches!(trade.status, TradeStatus::Draft | TradeStatus::Rejected) {
                    return Err(WorkflowError::Precondition {
                        trade_id: trade.id,
                        status: trade.status,
                        action: "amend trade",
                    });
                }
                input.apply(trade);
                trade.updated_at = at;
                Ok(Vec::new())
            })
            .await?;
        Ok(outcome.trade)
    }

    pub async fn submit(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.transition(trade_id, TradeStatus::PendingApproval, "submit trade")
            .await
    }

    /// Approve and run the automatic advance as far as the guards allow
    pub async fn approve(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.apply(trade_id, |trade, at| {
            let mut changes = vec![trade.transition(TradeStatus::Approved, "approve trade", at)?];
            changes.extend(trade.advance_after_approval(at)?);
            Ok(changes)
        })
        .await
    }

    pub async fn reject(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.transition(trade_id, TradeStatus::Rejected, "reject trade")
            .await
    }

    /// Send a pending or rejected trade back to draft for rework
    pub async fn return_to_draft(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.transition(trade_id, TradeStatus::Draft, "return trade to draft")
            .await
    }

    pub async fn mark_financing_complete(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.apply(trade_id, |trade, at| {
            if trade.status.is_terminal() {
                return Err(WorkflowError::Precondition {
                    trade_id: trade.id,
                    status: trade.status,
                    action: "mark financing complete",
                });
            }
            trade.financing_complete = true;
            trade.updated_at = at;
            trade.advance_after_approval(at)
        })
        .await
    }

    pub async fn release_for_delivery(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        self.transition(
            trade_id,
            TradeStatus::ReadyForDelivery,
            "release trade for delivery",
        )
        .await
    }

    /// Cancel the trade and return its vouchers to the pool.
    ///
    /// Batches already attached to open invoice periods stay there; those
    /// periods close and invoice as usual.
    pub async fn cancel(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        let _guard = self.engine.locks.lock_trade(trade_id).await?;
        let mut trade = self.engine.load_trade(trade_id).await?;

        let change = trade.transition(TradeStatus::Cancelled, "cancel trade", Utc::now())?;
        trade.allocation_complete = false;
        let expected = next_version(&mut trade);

        let released = self
            .engine
            .store
            .commit_cancellation(&trade, expected)
            .await?;

        tracing::info!(
            %trade_id,
            from = %change.from,
            released_vouchers = released.len(),
            "Trade cancelled"
        );

        let status_changes = vec![change];
        self.engine.publish_changes(&status_changes);
        Ok(TransitionOutcome {
            trade,
            status_changes,
        })
    }

    /// Close out a delivered trade once nothing remains due on its invoices
    pub async fn complete(&self, trade_id: Uuid) -> AppResult<TransitionOutcome> {
        let _guard = self.engine.locks.lock_trade(trade_id).await?;
        let mut trade = self.engine.load_trade(trade_id).await?;

        if trade.status != TradeStatus::Delivered {
            return Err(WorkflowError::Precondition {
                trade_id,
                status: trade.status,
                action: "complete trade",
            }
            .into());
        }

        let amount_due = self.engine.invoicing().trade_amount_due(&trade).await?;
        if amount_due > Decimal::ZERO {
            return Err(WorkflowError::PaymentPending {
                trade_id,
                amount_due,
            }
            .into());
        }

        let change = trade.transition(TradeStatus::Completed, "complete trade", Utc::now())?;
        self.persist(trade, vec![change]).await
    }

    /// Allocate vouchers, then release the trade for delivery
    pub async fn allocate_vouchers(
        &self,
        trade_id: Uuid,
        request: AllocationRequest,
    ) -> AppResult<AllocationResult> {
        self.engine.allocator().allocate(trade_id, request).await
    }

    async fn transition(
        &self,
        trade_id: Uuid,
        to: TradeStatus,
        action: &'static str,
    ) -> AppResult<TransitionOutcome> {
        self.apply(trade_id, move |trade, at| {
            Ok(vec![trade.transition(to, action, at)?])
        })
        .await
    }

    /// Load, mutate and write a trade under its lock
    async fn apply<F>(&self, trade_id: Uuid, mutate: F) -> AppResult<TransitionOutcome>
    where
        F: FnOnce(&mut Trade, DateTime<Utc>) -> WorkflowResult<Vec<StatusChange>>,
    {
        let _guard = self.engine.locks.lock_trade(trade_id).await?;
        let mut trade = self.engine.load_trade(trade_id).await?;

        let changes = mutate(&mut trade, Utc::now()).map_err(AppError::from)?;
        self.persist(trade, changes).await
    }

    async fn persist(
        &self,
        mut trade: Trade,
        status_changes: Vec<StatusChange>,
    ) -> AppResult<TransitionOutcome> {
        let expected = next_version(&mut trade);
        self.engine.store.update_trade(&trade, expected).await?;

        for change in &status_changes {
            tracing::info!(
                trade_id = %trade.id,
                from = %change.from,
                to = %change.to,
                "Trade transitioned"
            );
        }
        self.engine.publish_changes(&status_changes);

        Ok(TransitionOutcome {
            trade,
            status_changes,
        })
    }
}
