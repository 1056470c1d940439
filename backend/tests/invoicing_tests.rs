//! Invoice consolidation tests
//!
//! Tests for the invoice scheduler including:
//! - Target preview and its idempotency
//! - Period closing sweep and consolidated invoices
//! - Supplementary invoices for closed periods
//! - Mutual exclusion of attach and close on one period
//! - Payments

mod common;


use common::*;
use grain_fulfillment::config::EngineConfig;
use grain_fulfillment::error::AppError;
use proptest::prelude::*;
use shared::schedule::period_key;
use shared::{
    InvoiceKind, InvoiceTarget, PaymentTerms, ScheduleType, WorkflowError, WorkflowEvent,
};
use uuid::Uuid;

fn workflow_err(err: AppError) -> WorkflowError {
    match err {
        AppError::Workflow(e) => e,
        other => panic!("expected workflow error, got {other:?}"),
    }
}

// ============================================================================
// Target preview
// ============================================================================

#[tokio::test]
async fn test_preview_without_open_period() {
    let h = Harness::new();
    let terms = PaymentTerms::new(ScheduleType::Custom, 30);

    let target = h
        .engine
        .invoicing()
        .resolve_target(Uuid::new_v4(), &terms, date(2026, 2, 10))
        .await
        .unwrap();

    match target {
        InvoiceTarget::Period {
            key,
            period_id,
            due_date,
            ..
        } => {
            assert_eq!(key.boundary, date(2026, 2, 28));
            assert!(period_id.is_none());
            assert_eq!(due_date, date(2026, 3, 30));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_preview_points_at_open_period() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::new(ScheduleType::TwiceWeekly, 7)).await;
    let delivered = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("100", date(2026, 10, 15)))
        .await
        .unwrap();

    let preview = h
        .engine
        .invoicing()
        .resolve_target(trade.buyer_id, &trade.payment_terms, date(2026, 10, 18))
        .await
        .unwrap();

    // Thursday and Sunday share the Sunday period
    assert_eq!(preview, delivered.invoice_target);
}

// ============================================================================
// Closing sweep
// ============================================================================

#[tokio::test]
async fn test_period_closes_only_after_boundary() {
    let h = Harness::new();
    let mut rx = h.subscribe();
    let trade = h.ready("1000", PaymentTerms::new(ScheduleType::TwiceWeekly, 7)).await;
    let deliveries = h.engine.deliveries();
    let invoicing = h.engine.invoicing();

    // Tuesday and Wednesday (the boundary itself) land in one period
    let tuesday = deliveries
        .record_delivery(trade.id, batch("600", date(2026, 10, 13)))
        .await
        .unwrap();
    let wednesday = deliveries
        .record_delivery(trade.id, batch("200", date(2026, 10, 14)))
        .await
        .unwrap();
    assert_eq!(tuesday.batch.invoice_ref, wednesday.batch.invoice_ref);

    assert!(invoicing
        .close_due_periods(at(2026, 10, 14, 23))
        .await
        .unwrap()
        .is_empty());

    let issued = invoicing
        .close_due_periods(at(2026, 10, 15, 0))
        .await
        .unwrap();
    assert_eq!(issued.len(), 1);
    let invoice = &issued[0];
    assert_eq!(invoice.kind, InvoiceKind::Consolidated);
    assert_eq!(invoice.issue_date, date(2026, 10, 14));
    assert_eq!(invoice.due_date, date(2026, 10, 21));
    assert_eq!(invoice.total_amount, dec("360"));
    assert_eq!(invoice.batch_ids, vec![tuesday.batch.id, wednesday.batch.id]);

    let periods = h.store.periods_for_customer(trade.buyer_id).unwrap();
    assert!(!periods[0].is_open());
    assert_eq!(periods[0].invoice_id, Some(invoice.id));

    let mut issued_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, WorkflowEvent::InvoiceIssued { .. }) {
            issued_events += 1;
        }
    }
    assert_eq!(issued_events, 1);

    // A second sweep has nothing left to do
    assert!(invoicing
        .close_due_periods(at(2026, 10, 16, 0))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_late_delivery_for_closed_period_gets_supplementary_invoice() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::new(ScheduleType::Weekly, 5)).await;
    let deliveries = h.engine.deliveries();

    let first = deliveries
        .record_delivery(trade.id, batch("300", date(2026, 10, 14)))
        .await
        .unwrap();
    h.engine
        .invoicing()
        .close_due_periods(at(2026, 10, 19, 8))
        .await
        .unwrap();

    // Backdated GRN for the already invoiced week
    let late = deliveries
        .record_delivery(trade.id, batch("100", date(2026, 10, 16)))
        .await
        .unwrap();

    match &late.invoice_target {
        InvoiceTarget::Supplementary {
            closed_period_id,
            due_date,
            ..
        } => {
            assert_eq!(Some(*closed_period_id), match first.invoice_target {
                InvoiceTarget::Period { period_id, .. } => period_id,
                _ => None,
            });
            assert_eq!(*due_date, date(2026, 10, 22));
        }
        other => panic!("unexpected {other:?}"),
    }
    let invoice = late.issued_invoice.unwrap();
    assert_eq!(invoice.kind, InvoiceKind::Supplementary);
    assert_eq!(invoice.total_amount, dec("45"));

    // The closed period itself did not change
    let periods = h.store.periods_for_customer(trade.buyer_id).unwrap();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].batch_ids, vec![first.batch.id]);
}

#[tokio::test]
async fn test_sweep_skips_locked_period_and_closes_the_rest() {
    let h = Harness::with_settings(EngineConfig {
        lock_timeout_ms: 50,
        ..EngineConfig::default()
    });
    let weekly = PaymentTerms::new(ScheduleType::Weekly, 7);
    let busy = h.ready("1000", weekly).await;
    let free = h.ready("1000", weekly).await;
    for trade in [&busy, &free] {
        h.engine
            .deliveries()
            .record_delivery(trade.id, batch("100", date(2026, 10, 13)))
            .await
            .unwrap();
    }

    let key = period_key(busy.buyer_id, &busy.payment_terms, date(2026, 10, 13)).unwrap();
    let held = h.engine.locks.lock_period(&key).await.unwrap();

    // An attach is in flight on the busy period; only the other one closes
    let issued = h
        .engine
        .invoicing()
        .close_due_periods(at(2026, 10, 20, 0))
        .await
        .unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].customer_id, free.buyer_id);
    assert!(h.store.periods_for_customer(busy.buyer_id).unwrap()[0].is_open());
    assert!(!h.store.periods_for_customer(free.buyer_id).unwrap()[0].is_open());

    drop(held);
    let issued = h
        .engine
        .invoicing()
        .close_due_periods(at(2026, 10, 20, 0))
        .await
        .unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].customer_id, busy.buyer_id);
    assert_eq!(h.store.invoices_for_customer(free.buyer_id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_attach_racing_close_invoices_every_batch_once() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::new(ScheduleType::TwiceWeekly, 7)).await;
    let first = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("100", date(2026, 10, 13)))
        .await
        .unwrap();

    let deliveries = h.engine.deliveries();
    let invoicing = h.engine.invoicing();
    let trade_id = trade.id;
    let (attached, closed) = tokio::join!(
        tokio::spawn(async move {
            deliveries
                .record_delivery(trade_id, batch("200", date(2026, 10, 14)))
                .await
        }),
        tokio::spawn(async move { invoicing.close_due_periods(at(2026, 10, 15, 0)).await }),
    );
    let second = attached.unwrap().unwrap();
    closed.unwrap().unwrap();

    let invoices = h.store.invoices_for_customer(trade.buyer_id).unwrap();
    for batch_id in [first.batch.id, second.batch.id] {
        let holders = invoices
            .iter()
            .filter(|i| i.batch_ids.contains(&batch_id))
            .count();
        assert_eq!(holders, 1, "batch {batch_id} invoiced exactly once");
    }
    let total: rust_decimal::Decimal = invoices.iter().map(|i| i.total_amount).sum();
    assert_eq!(total, dec("135"));
}

// ============================================================================
// Payments
// ============================================================================

#[tokio::test]
async fn test_payment_bounds() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;
    let invoice = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("100", date(2026, 10, 13)))
        .await
        .unwrap()
        .issued_invoice
        .unwrap();
    let invoicing = h.engine.invoicing();

    for amount in ["0", "-1", "45.01"] {
        let err = workflow_err(
            invoicing
                .record_payment(invoice.id, dec(amount))
                .await
                .unwrap_err(),
        );
        assert!(matches!(err, WorkflowError::Validation { .. }), "{amount}");
    }

    let partial = invoicing.record_payment(invoice.id, dec("20")).await.unwrap();
    assert_eq!(partial.amount_due, dec("25"));
    let settled = invoicing.record_payment(invoice.id, dec("25")).await.unwrap();
    assert!(settled.is_settled());
}

// ============================================================================
// Property Tests
// ============================================================================

fn schedule_strategy() -> impl Strategy<Value = ScheduleType> {
    prop_oneof![
        Just(ScheduleType::Immediate),
        Just(ScheduleType::TwiceWeekly),
        Just(ScheduleType::Weekly),
        Just(ScheduleType::Custom),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Previewing twice before the period closes returns the same key
    #[test]
    fn prop_preview_is_idempotent(
        schedule in schedule_strategy(),
        days in 0u32..90,
        offset in 0u32..365,
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let customer = Uuid::new_v4();
            let terms = PaymentTerms::new(schedule, days);
            let delivery_date = shared::schedule::add_days(date(2026, 1, 1), offset);
            let invoicing = h.engine.invoicing();

            let first = invoicing.resolve_target(customer, &terms, delivery_date).await.unwrap();
            let second = invoicing.resolve_target(customer, &terms, delivery_date).await.unwrap();

            prop_assert_eq!(first.period_key(), second.period_key());
            prop_assert_eq!(first, second);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
