//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use grain_fulfillment::config::{Config, EngineConfig, ServerConfig, StorageBackend, StorageConfig};
use grain_fulfillment::external::BroadcastEventSink;
use grain_fulfillment::store::MemoryStore;
use grain_fulfillment::{AppState, Engine};
use rust_decimal::Decimal;
use shared::{
    CreateTradeInput, NewDeliveryBatch, PaymentTerms, Trade, TradeStatus, Voucher, WorkflowEvent,
};
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub events: BroadcastEventSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineConfig::default())
    }

    pub fn with_settings(settings: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = BroadcastEventSink::new(256);
        let engine = Engine::new(
            store.clone(),
            store.clone(),
            Arc::new(events.clone()),
            settings,
        );
        Self {
            engine,
            store,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            config: Arc::new(Config {
                environment: "test".to_string(),
                server: ServerConfig::default(),
                storage: StorageConfig {
                    backend: StorageBackend::Memory,
                },
                database: None,
                engine: self.engine.settings.clone(),
            }),
            db: None,
        }
    }

    pub async fn draft(&self, input: CreateTradeInput) -> Trade {
        self.engine.trades().create(input).await.unwrap()
    }

    /// Create, submit and approve; the trade ends wherever the automatic
    /// advance leaves it
    pub async fn approved(&self, input: CreateTradeInput) -> Trade {
        let trade = self.draft(input).await;
        self.engine.trades().submit(trade.id).await.unwrap();
        self.engine.trades().approve(trade.id).await.unwrap().trade
    }

    /// A trade released for delivery without voucher allocation
    pub async fn ready(&self, ordered_kg: &str, terms: PaymentTerms) -> Trade {
        let trade = self.approved(trade_input(ordered_kg, terms)).await;
        assert_eq!(trade.status, TradeStatus::ReadyForDelivery);
        trade
    }

    /// Deposit a voucher matching the trade's hub, grain type and grade
    pub fn deposit(&self, trade: &Trade, quantity_kg: &str, deposit_date: NaiveDate) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_voucher(Voucher {
                id,
                voucher_number: format!("WRV-{}", &id.simple().to_string()[..6]),
                hub_id: trade.hub_id,
                grain_type_id: trade.grain_type_id,
                grade: trade.grade.clone(),
                quantity_kg: dec(quantity_kg),
                deposit_date,
                allocated_to: None,
            })
            .unwrap();
        id
    }
}

pub fn trade_input(ordered_kg: &str, terms: PaymentTerms) -> CreateTradeInput {
    CreateTradeInput {
        reference: None,
        buyer_id: Uuid::new_v4(),
        supplier_id: Uuid::new_v4(),
        hub_id: Uuid::new_v4(),
        grain_type_id: Uuid::new_v4(),
        grade: "G1".to_string(),
        ordered_quantity_kg: dec(ordered_kg),
        price_per_kg: dec("0.45"),
        payment_terms: terms,
        requires_financing: false,
        requires_voucher_allocation: false,
    }
}

/// Input for a trade that shares hub, grain type and grade with `like`
pub fn sibling_input(like: &Trade, ordered_kg: &str) -> CreateTradeInput {
    CreateTradeInput {
        hub_id: like.hub_id,
        grain_type_id: like.grain_type_id,
        grade: like.grade.clone(),
        ..trade_input(ordered_kg, like.payment_terms)
    }
}

pub fn batch(net_kg: &str, delivery_date: NaiveDate) -> NewDeliveryBatch {
    let tare = dec("1200");
    NewDeliveryBatch {
        grn_number: format!("GRN-{}", &Uuid::new_v4().simple().to_string()[..8]),
        gross_weight_kg: dec(net_kg) + tare,
        tare_weight_kg: tare,
        loading_date: delivery_date,
        delivery_date,
        vehicle_number: "KCA 512Q".to_string(),
        driver_name: "P. Mwangi".to_string(),
        dispatched_by: "Hub Clerk".to_string(),
        received_by: "Buyer Stores".to_string(),
        received_at: None,
    }
}
