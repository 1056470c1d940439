//! Event sinks for status changes and issued invoices
//!
//! Events are published after the state they describe has been committed,
//! in the order the engine produced them.

use shared::WorkflowEvent;
use tokio::sync::broadcast;

/// Receiver of workflow events for notification and audit
pub trait EventSink: Send + Sync {
    fn publish(&self, event: WorkflowEvent);

    fn publish_all(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: WorkflowEvent) {
        match &event {
            WorkflowEvent::StatusChanged {
                trade_id, from, to, ..
            } => {
                tracing::info!(%trade_id, %from, %to, "Trade status changed");
            }
            WorkflowEvent::InvoiceIssued {
                invoice_id,
                customer_id,
                kind,
                amount,
                due_date,
                ..
            } => {
                tracing::info!(
                    %invoice_id,
                    %customer_id,
                    kind = kind.as_str(),
                    %amount,
                    %due_date,
                    "Invoice issued"
                );
            }
        }
    }
}

/// Fans events out to in-process subscribers
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: WorkflowEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}
