//! Workflow engine services
//!
//! Every service holds an [`Engine`], the bundle of collaborators it runs
//! against. Services are cheap to clone and construct per request.

pub mod allocation;
pub mod delivery;
pub mod invoicing;
pub mod locks;
pub mod trade;

pub use allocation::VoucherAllocator;
pub use delivery::DeliveryService;
pub use invoicing::InvoiceScheduler;
pub use locks::LockRegistry;
pub use trade::TradeService;

use std::sync::Arc;

use shared::{StatusChange, Trade, WorkflowEvent};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::external::EventSink;
use crate::store::{trade_resource, FulfillmentStore, InventoryQuery};

#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn FulfillmentStore>,
    pub inventory: Arc<dyn InventoryQuery>,
    pub events: Arc<dyn EventSink>,
    pub locks: Arc<LockRegistry>,
    pub settings: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn FulfillmentStore>,
        inventory: Arc<dyn InventoryQuery>,
        events: Arc<dyn EventSink>,
        settings: EngineConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            events,
            locks: Arc::new(LockRegistry::new(settings.lock_timeout())),
            settings,
        }
    }

    pub fn trades(&self) -> TradeService {
        TradeService::new(self.clone())
    }

    pub fn allocator(&self) -> VoucherAllocator {
        VoucherAllocator::new(self.clone())
    }

    pub fn deliveries(&self) -> DeliveryService {
        DeliveryService::new(self.clone())
    }

    pub fn invoicing(&self) -> InvoiceScheduler {
        InvoiceScheduler::new(self.clone())
    }

    pub(crate) async fn load_trade(&self, trade_id: Uuid) -> AppResult<Trade> {
        self.store
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| AppError::not_found(trade_resource(trade_id)))
    }

    pub(crate) fn publish_changes(&self, changes: &[StatusChange]) {
        self.events
            .publish_all(changes.iter().map(WorkflowEvent::from).collect());
    }
}

/// Bump the trade's version for a write; returns the version it was loaded at
pub(crate) fn next_version(trade: &mut Trade) -> i64 {
    let expected = trade.version;
    trade.version += 1;
    expected
}
