//! Invoice consolidation scheduler
//!
//! Resolves where a delivery is invoiced and closes consolidation periods
//! once their boundary date has passed. Attaching a batch to a period and
//! closing that period both run under the period's lock, so a period never
//! closes while a delivery is being attached to it.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::schedule::{self, period_key};
use shared::{
    DeliveryBatch, Invoice, InvoiceKind, InvoicePeriod, InvoiceRef, InvoiceTarget, PaymentTerms,
    Trade, WorkflowEvent,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::Engine;
use crate::error::{AppError, AppResult};
use crate::store::{InvoiceDestination, StoreError};

/// How a delivery's invoice side will be committed
#[derive(Debug, Clone)]
pub(crate) struct InvoicePlan {
    pub target: InvoiceTarget,
    pub destination: InvoiceDestination,
    pub invoice_ref: InvoiceRef,
    /// Invoice issued together with the delivery, if any
    pub issued: Option<Invoice>,
}

#[derive(Clone)]
pub struct InvoiceScheduler {
    engine: Engine,
}

impl InvoiceScheduler {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Preview where a delivery on `delivery_date` would be invoiced.
    /// Read-only; repeated calls before the period closes agree.
    pub async fn resolve_target(
        &self,
        customer_id: Uuid,
        terms: &PaymentTerms,
        delivery_date: NaiveDate,
    ) -> AppResult<InvoiceTarget> {
        let (target, _) = self.lookup(customer_id, terms, delivery_date).await?;
        Ok(target)
    }

    async fn lookup(
        &self,
        customer_id: Uuid,
        terms: &PaymentTerms,
        delivery_date: NaiveDate,
    ) -> AppResult<(InvoiceTarget, Option<InvoicePeriod>)> {
        let existing = match period_key(customer_id, terms, delivery_date) {
            Some(key) => self.engine.store.latest_period(&key).await?,
            None => None,
        };
        let target = schedule::resolve_target(customer_id, terms, delivery_date, existing.as_ref());

        tracing::debug!(
            %customer_id,
            schedule = terms.schedule.as_str(),
            %delivery_date,
            due_date = %target.due_date(),
            "Invoice target resolved"
        );
        Ok((target, existing))
    }

    /// Plan the invoice side of a delivery. The caller holds the period lock
    /// for the delivery's key, when it has one.
    pub(crate) async fn plan(
        &self,
        trade: &Trade,
        batch_id: Uuid,
        value: Decimal,
        delivery_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<InvoicePlan> {
        let customer_id = trade.buyer_id;
        let terms = &trade.payment_terms;
        let (target, existing) = self.lookup(customer_id, terms, delivery_date).await?;

        let plan = match target {
            InvoiceTarget::Immediate {
                issue_date,
                due_date,
            } => single_invoice(
                InvoiceKind::Immediate,
                target,
                customer_id,
                batch_id,
                issue_date,
                due_date,
                value,
                now,
            ),
            InvoiceTarget::Supplementary {
                issue_date,
                due_date,
                ..
            } => single_invoice(
                InvoiceKind::Supplementary,
                target,
                customer_id,
                batch_id,
                issue_date,
                due_date,
                value,
                now,
            ),
            InvoiceTarget::Period {
                period_id: Some(period_id),
                ..
            } => {
                // Attach must also succeed against the stored amount
                if let Some(mut open) = existing {
                    open.attach(batch_id, value)?;
                }
                InvoicePlan {
                    destination: InvoiceDestination::AttachToPeriod { period_id, value },
                    invoice_ref: InvoiceRef::Period(period_id),
                    issued: None,
                    target,
                }
            }
            InvoiceTarget::Period {
                key,
                period_id: None,
                finalize_date,
                due_date,
            } => {
                let mut period = InvoicePeriod::open(key, terms.days, now);
                period.attach(batch_id, value)?;
                InvoicePlan {
                    target: InvoiceTarget::Period {
                        key,
                        period_id: Some(period.id),
                        finalize_date,
                        due_date,
                    },
                    invoice_ref: InvoiceRef::Period(period.id),
                    destination: InvoiceDestination::OpenPeriod(period),
                    issued: None,
                }
            }
        };
        Ok(plan)
    }

    /// Close every open period whose boundary is strictly before `as_of`'s
    /// date and issue its consolidated invoice. A period that cannot be
    /// closed right now is left for the next sweep; the result lists the
    /// invoices actually issued.
    pub async fn close_due_periods(&self, as_of: DateTime<Utc>) -> AppResult<Vec<Invoice>> {
        let today = as_of.date_naive();
        let due = self.engine.store.list_due_periods(today).await?;
        let mut issued = Vec::with_capacity(due.len());

        for candidate in due {
            match self.close_if_due(&candidate, today).await {
                Ok(Some(invoice)) => issued.push(invoice),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        period_id = %candidate.id,
                        key = %candidate.key,
                        error = %e,
                        "Period not closed; left for the next sweep"
                    );
                }
            }
        }

        Ok(issued)
    }

    async fn close_if_due(
        &self,
        candidate: &InvoicePeriod,
        today: NaiveDate,
    ) -> AppResult<Option<Invoice>> {
        let _guard = self.engine.locks.lock_period(&candidate.key).await?;

        // Re-read under the lock; an attach may have landed meanwhile
        let Some(mut period) = self.engine.store.get_period(candidate.id).await? else {
            return Ok(None);
        };
        if !period.is_open() || period.key.boundary >= today {
            return Ok(None);
        }

        let invoice = period.close(Utc::now())?;
        match self.engine.store.close_period(&period, &invoice).await {
            Ok(()) => {}
            Err(StoreError::Conflict(resource)) => {
                tracing::warn!(%resource, "Period already closed elsewhere; skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            period_id = %period.id,
            key = %period.key,
            batches = period.batch_ids.len(),
            amount = %invoice.total_amount,
            "Invoice period closed"
        );
        self.engine.events.publish(WorkflowEvent::from(&invoice));
        Ok(Some(invoice))
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        self.engine
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("invoice {}", invoice_id)))
    }

    pub async fn get_period(&self, period_id: Uuid) -> AppResult<InvoicePeriod> {
        self.engine
            .store
            .get_period(period_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("invoice period {}", period_id)))
    }

    /// Apply a payment against an issued invoice
    pub async fn record_payment(&self, invoice_id: Uuid, amount: Decimal) -> AppResult<Invoice> {
        let mut invoice = self.get_invoice(invoice_id).await?;
        let expected_due = invoice.amount_due;
        invoice.record_payment(amount)?;

        self.engine
            .store
            .update_invoice_amount_due(invoice_id, expected_due, invoice.amount_due)
            .await?;

        tracing::info!(
            %invoice_id,
            %amount,
            amount_due = %invoice.amount_due,
            "Invoice payment recorded"
        );
        Ok(invoice)
    }

    /// Amount still due across every invoice reachable from the trade's
    /// batches. A batch in a period that has not closed yet counts at its
    /// full value.
    pub async fn trade_amount_due(&self, trade: &Trade) -> AppResult<Decimal> {
        let batches = self.engine.store.list_batches(trade.id).await?;
        let mut invoices = HashSet::new();
        let mut pending = Decimal::ZERO;

        for batch in &batches {
            match self.invoice_of(batch).await? {
                Some(invoice_id) => {
                    invoices.insert(invoice_id);
                }
                None => {
                    pending = pending.checked_add(batch.value).ok_or_else(|| {
                        anyhow::anyhow!("pending value of trade {} overflows", trade.id)
                    })?;
                }
            }
        }

        let mut amount_due = pending;
        for invoice_id in invoices {
            let due = self.get_invoice(invoice_id).await?.amount_due;
            amount_due = amount_due
                .checked_add(due)
                .ok_or_else(|| anyhow::anyhow!("amount due of trade {} overflows", trade.id))?;
        }
        Ok(amount_due)
    }

    async fn invoice_of(&self, batch: &DeliveryBatch) -> AppResult<Option<Uuid>> {
        match batch.invoice_ref {
            InvoiceRef::Invoice(invoice_id) => Ok(Some(invoice_id)),
            InvoiceRef::Period(period_id) => Ok(self.get_period(period_id).await?.invoice_id),
        }
    }

    /// Run [`close_due_periods`](Self::close_due_periods) on a fixed interval
    pub fn spawn_period_sweeper(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.close_due_periods(Utc::now()).await {
                    Ok(invoices) if invoices.is_empty() => {
                        tracing::debug!("Period sweep found nothing due");
                    }
                    Ok(invoices) => {
                        tracing::info!(issued = invoices.len(), "Period sweep completed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Period sweep failed");
                    }
                }
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn single_invoice(
    kind: InvoiceKind,
    target: InvoiceTarget,
    customer_id: Uuid,
    batch_id: Uuid,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    value: Decimal,
    now: DateTime<Utc>,
) -> InvoicePlan {
    let invoice = Invoice::single(kind, customer_id, batch_id, issue_date, due_date, value, now);
    InvoicePlan {
        target,
        destination: InvoiceDestination::Issue(invoice.clone()),
        invoice_ref: InvoiceRef::Invoice(invoice.id),
        issued: Some(invoice),
    }
}
