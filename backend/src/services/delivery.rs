//! Delivery batch processing
//!
//! Recording a batch runs under the trade lock (ledger bound) and, for
//! consolidated schedules, the period lock of the delivery's key. The batch,
//! its invoice destination and the trade's new status commit together or
//! not at all.

use chrono::Utc;
use shared::ledger::QuantityLedger;
use shared::schedule::period_key;
use shared::{
    validate_delivery_batch, DeliveryBatch, DeliveryProgress, DeliveryResult, NewDeliveryBatch,
    TradeStatus, WorkflowError, WorkflowEvent,
};
use uuid::Uuid;

use super::{next_version, Engine};
use crate::error::AppResult;

#[derive(Clone)]
pub struct DeliveryService {
    engine: Engine,
}

impl DeliveryService {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Record a delivery batch (GRN) against a trade
    pub async fn record_delivery(
        &self,
        trade_id: Uuid,
        input: NewDeliveryBatch,
    ) -> AppResult<DeliveryResult> {
        let net_weight_kg = validate_delivery_batch(&input)?;

        let _trade_guard = self.engine.locks.lock_trade(trade_id).await?;
        let mut trade = self.engine.load_trade(trade_id).await?;

        if !trade.status.accepts_deliveries() {
            return Err(WorkflowError::Precondition {
                trade_id,
                status: trade.status,
                action: "record delivery",
            }
            .into());
        }

        let batches = self.engine.store.list_batches(trade_id).await?;
        let mut ledger = QuantityLedger::from_batches(trade_id, trade.ordered_quantity_kg, &batches);
        let reservation = ledger.reserve(net_weight_kg).map_err(|e| {
            tracing::warn!(%trade_id, %net_weight_kg, remaining_kg = %ledger.remaining_kg(), "Delivery rejected");
            e
        })?;

        let _period_guard = match period_key(trade.buyer_id, &trade.payment_terms, input.delivery_date) {
            Some(key) => Some(self.engine.locks.lock_period(&key).await?),
            None => None,
        };

        let now = Utc::now();
        let batch_id = Uuid::new_v4();
        let value = trade.value_of(net_weight_kg)?;
        let plan = self
            .engine
            .invoicing()
            .plan(&trade, batch_id, value, input.delivery_date, now)
            .await?;

        let batch = DeliveryBatch {
            id: batch_id,
            trade_id,
            grn_number: input.grn_number,
            gross_weight_kg: input.gross_weight_kg,
            tare_weight_kg: input.tare_weight_kg,
            net_weight_kg,
            value,
            loading_date: input.loading_date,
            delivery_date: input.delivery_date,
            vehicle_number: input.vehicle_number,
            driver_name: input.driver_name,
            dispatched_by: input.dispatched_by,
            received_by: input.received_by,
            received_at: input.received_at,
            invoice_ref: plan.invoice_ref,
            created_at: now,
        };

        let mut status_changes = Vec::new();
        if trade.status == TradeStatus::ReadyForDelivery {
            status_changes.push(trade.transition(TradeStatus::InTransit, "record delivery", now)?);
        }
        if reservation.completes_order() {
            status_changes.push(trade.transition(TradeStatus::Delivered, "record delivery", now)?);
        }
        trade.updated_at = now;
        let expected = next_version(&mut trade);

        self.engine
            .store
            .commit_delivery(&trade, expected, &batch, &plan.destination)
            .await?;
        ledger.commit(&reservation);

        tracing::info!(
            %trade_id,
            batch_id = %batch.id,
            grn = %batch.grn_number,
            %net_weight_kg,
            remaining_kg = %ledger.remaining_kg(),
            "Delivery recorded"
        );

        self.engine.publish_changes(&status_changes);
        if let Some(invoice) = &plan.issued {
            self.engine.events.publish(WorkflowEvent::from(invoice));
        }

        Ok(DeliveryResult {
            batch,
            invoice_target: plan.target,
            issued_invoice: plan.issued,
            status_changes,
            progress: ledger.progress(),
        })
    }

    pub async fn get_progress(&self, trade_id: Uuid) -> AppResult<DeliveryProgress> {
        let trade = self.engine.load_trade(trade_id).await?;
        let batches = self.engine.store.list_batches(trade_id).await?;
        Ok(QuantityLedger::from_batches(trade_id, trade.ordered_quantity_kg, &batches).progress())
    }

    pub async fn list_batches(&self, trade_id: Uuid) -> AppResult<Vec<DeliveryBatch>> {
        self.engine.load_trade(trade_id).await?;
        Ok(self.engine.store.list_batches(trade_id).await?)
    }
}
