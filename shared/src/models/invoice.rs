//! Invoice and consolidation period models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::schedule::add_days;
use crate::types::ScheduleType;
use crate::validation::check_money_scale;

/// Bucket identity of a consolidation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub customer_id: Uuid,
    pub schedule: ScheduleType,
    /// Last day included in the period; also its finalize date
    pub boundary: NaiveDate,
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.customer_id, self.schedule, self.boundary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "open",
            PeriodStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PeriodStatus::Open),
            "closed" => Some(PeriodStatus::Closed),
            _ => None,
        }
    }
}

/// Accumulation window for a consolidated invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePeriod {
    pub id: Uuid,
    pub key: PeriodKey,
    pub status: PeriodStatus,
    /// Credit days taken from the terms of the delivery that opened the period
    pub due_days: u32,
    pub batch_ids: Vec<Uuid>,
    /// Sum of attached batch values
    pub amount: Decimal,
    pub invoice_id: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl InvoicePeriod {
    pub fn open(key: PeriodKey, due_days: u32, opened_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            status: PeriodStatus::Open,
            due_days,
            batch_ids: Vec::new(),
            amount: Decimal::ZERO,
            invoice_id: None,
            opened_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PeriodStatus::Open
    }

    pub fn finalize_date(&self) -> NaiveDate {
        self.key.boundary
    }

    pub fn due_date(&self) -> NaiveDate {
        add_days(self.key.boundary, self.due_days)
    }

    /// Append a batch; closed periods are immutable
    pub fn attach(&mut self, batch_id: Uuid, value: Decimal) -> WorkflowResult<()> {
        if !self.is_open() {
            return Err(WorkflowError::concurrent(format!("invoice period {}", self.key)));
        }
        let amount = self.amount.checked_add(value).ok_or_else(|| {
            WorkflowError::validation("value", "Invoice period amount is out of range")
        })?;
        self.batch_ids.push(batch_id);
        self.amount = amount;
        Ok(())
    }

    /// Close the period and build the consolidated invoice it issues
    pub fn close(&mut self, closed_at: DateTime<Utc>) -> WorkflowResult<Invoice> {
        if !self.is_open() {
            return Err(WorkflowError::concurrent(format!("invoice period {}", self.key)));
        }
        let invoice = Invoice {
            id: Uuid::new_v4(),
            customer_id: self.key.customer_id,
            kind: InvoiceKind::Consolidated,
            period_id: Some(self.id),
            batch_ids: self.batch_ids.clone(),
            issue_date: self.key.boundary,
            due_date: self.due_date(),
            total_amount: self.amount,
            amount_due: self.amount,
            issued_at: closed_at,
        };
        self.status = PeriodStatus::Closed;
        self.invoice_id = Some(invoice.id);
        self.closed_at = Some(closed_at);
        Ok(invoice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// One delivery, issued at delivery time
    Immediate,
    /// Issued when a period closes
    Consolidated,
    /// Late delivery into a period that had already closed
    Supplementary,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Immediate => "immediate",
            InvoiceKind::Consolidated => "consolidated",
            InvoiceKind::Supplementary => "supplementary",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(InvoiceKind::Immediate),
            "consolidated" => Some(InvoiceKind::Consolidated),
            "supplementary" => Some(InvoiceKind::Supplementary),
            _ => None,
        }
    }
}

/// An issued invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub kind: InvoiceKind,
    pub period_id: Option<Uuid>,
    pub batch_ids: Vec<Uuid>,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub amount_due: Decimal,
    pub issued_at: DateTime<Utc>,
}

impl Invoice {
    /// Invoice for a single batch, issued now
    pub fn single(
        kind: InvoiceKind,
        customer_id: Uuid,
        batch_id: Uuid,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        amount: Decimal,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            kind,
            period_id: None,
            batch_ids: vec![batch_id],
            issue_date,
            due_date,
            total_amount: amount,
            amount_due: amount,
            issued_at,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.amount_due.is_zero()
    }

    pub fn record_payment(&mut self, amount: Decimal) -> WorkflowResult<()> {
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::validation("amount", "Payment must be positive"));
        }
        check_money_scale(amount).map_err(|msg| WorkflowError::validation("amount", msg))?;
        if amount > self.amount_due {
            return Err(WorkflowError::validation(
                "amount",
                format!("Payment {} exceeds amount due {}", amount, self.amount_due),
            ));
        }
        self.amount_due -= amount;
        Ok(())
    }
}

/// Where a delivery on a given date is invoiced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvoiceTarget {
    /// Invoice issued synchronously with the delivery
    Immediate {
        issue_date: NaiveDate,
        due_date: NaiveDate,
    },
    /// Consolidation period; `period_id` is set when the period is already open
    Period {
        key: PeriodKey,
        period_id: Option<Uuid>,
        finalize_date: NaiveDate,
        due_date: NaiveDate,
    },
    /// The period for this key already closed; a standalone invoice carries
    /// the closed period's due date
    Supplementary {
        key: PeriodKey,
        closed_period_id: Uuid,
        issue_date: NaiveDate,
        due_date: NaiveDate,
    },
}

impl InvoiceTarget {
    pub fn period_key(&self) -> Option<&PeriodKey> {
        match self {
            InvoiceTarget::Immediate { .. } => None,
            InvoiceTarget::Period { key, .. } | InvoiceTarget::Supplementary { key, .. } => {
                Some(key)
            }
        }
    }

    pub fn due_date(&self) -> NaiveDate {
        match self {
            InvoiceTarget::Immediate { due_date, .. }
            | InvoiceTarget::Period { due_date, .. }
            | InvoiceTarget::Supplementary { due_date, .. } => *due_date,
        }
    }
}
