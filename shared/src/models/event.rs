//! Workflow events published for notification and audit

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Invoice, InvoiceKind, StatusChange, TradeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StatusChanged {
        trade_id: Uuid,
        from: TradeStatus,
        to: TradeStatus,
        timestamp: DateTime<Utc>,
    },
    InvoiceIssued {
        invoice_id: Uuid,
        customer_id: Uuid,
        kind: InvoiceKind,
        amount: Decimal,
        due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
}

impl From<&StatusChange> for WorkflowEvent {
    fn from(change: &StatusChange) -> Self {
        WorkflowEvent::StatusChanged {
            trade_id: change.trade_id,
            from: change.from,
            to: change.to,
            timestamp: change.timestamp,
        }
    }
}

impl From<&Invoice> for WorkflowEvent {
    fn from(invoice: &Invoice) -> Self {
        WorkflowEvent::InvoiceIssued {
            invoice_id: invoice.id,
            customer_id: invoice.customer_id,
            kind: invoice.kind,
            amount: invoice.total_amount,
            due_date: invoice.due_date,
            timestamp: invoice.issued_at,
        }
    }
}
