//! Delivery batch and quantity ledger tests
//!
//! Tests for delivery recording including:
//! - Over-delivery rejection with no partial acceptance
//! - Automatic in_transit / delivered transitions
//! - Invoice destination committed with the batch
//! - Property: delivered never exceeds ordered

mod common;

use common::*;
use grain_fulfillment::error::AppError;
use grain_fulfillment::store::FulfillmentStore;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    InvoiceKind, InvoiceRef, InvoiceTarget, PaymentTerms, ScheduleType, TradeStatus,
    WorkflowError,
};

fn workflow_err(err: AppError) -> WorkflowError {
    match err {
        AppError::Workflow(e) => e,
        other => panic!("expected workflow error, got {other:?}"),
    }
}

// ============================================================================
// Ledger bound
// ============================================================================

#[tokio::test]
async fn test_second_batch_over_remaining_is_rejected() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(7)).await;
    let deliveries = h.engine.deliveries();

    deliveries
        .record_delivery(trade.id, batch("600", date(2026, 10, 13)))
        .await
        .unwrap();

    let err = workflow_err(
        deliveries
            .record_delivery(trade.id, batch("500", date(2026, 10, 14)))
            .await
            .unwrap_err(),
    );
    assert_eq!(
        err,
        WorkflowError::OverDelivery {
            requested_kg: dec("500"),
            remaining_kg: dec("400"),
        }
    );

    // Nothing of the rejected batch is visible
    let progress = deliveries.get_progress(trade.id).await.unwrap();
    assert_eq!(progress.delivered_kg, dec("600"));
    assert_eq!(progress.batch_count, 1);
    assert_eq!(h.store.invoices_for_customer(trade.buyer_id).unwrap().len(), 1);

    let accepted = deliveries
        .record_delivery(trade.id, batch("400", date(2026, 10, 14)))
        .await
        .unwrap();
    assert!(accepted.progress.is_fully_delivered);
    assert_eq!(accepted.progress.remaining_kg, dec("0"));
}

#[tokio::test]
async fn test_first_batch_moves_to_in_transit_and_last_to_delivered() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;
    let deliveries = h.engine.deliveries();

    let first = deliveries
        .record_delivery(trade.id, batch("250", date(2026, 10, 12)))
        .await
        .unwrap();
    assert_eq!(first.status_changes.len(), 1);
    assert_eq!(first.status_changes[0].to, TradeStatus::InTransit);

    let second = deliveries
        .record_delivery(trade.id, batch("250", date(2026, 10, 13)))
        .await
        .unwrap();
    assert!(second.status_changes.is_empty());

    let last = deliveries
        .record_delivery(trade.id, batch("500", date(2026, 10, 14)))
        .await
        .unwrap();
    assert_eq!(last.status_changes.len(), 1);
    assert_eq!(last.status_changes[0].to, TradeStatus::Delivered);
    assert_eq!(
        h.engine.trades().get(trade.id).await.unwrap().status,
        TradeStatus::Delivered
    );
}

#[tokio::test]
async fn test_single_full_batch_emits_both_transitions() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;

    let result = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("1000", date(2026, 10, 12)))
        .await
        .unwrap();

    let hops: Vec<_> = result.status_changes.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        hops,
        vec![
            (TradeStatus::ReadyForDelivery, TradeStatus::InTransit),
            (TradeStatus::InTransit, TradeStatus::Delivered),
        ]
    );
}

#[tokio::test]
async fn test_delivered_trade_accepts_no_more_batches() {
    let h = Harness::new();
    let trade = h.ready("100", PaymentTerms::immediate(0)).await;
    let deliveries = h.engine.deliveries();

    deliveries
        .record_delivery(trade.id, batch("100", date(2026, 10, 12)))
        .await
        .unwrap();
    let err = workflow_err(
        deliveries
            .record_delivery(trade.id, batch("1", date(2026, 10, 12)))
            .await
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        WorkflowError::Precondition {
            status: TradeStatus::Delivered,
            ..
        }
    ));
}

#[tokio::test]
async fn test_delivery_before_release_is_refused() {
    let h = Harness::new();
    let trade = h.draft(trade_input("1000", PaymentTerms::immediate(0))).await;

    let err = workflow_err(
        h.engine
            .deliveries()
            .record_delivery(trade.id, batch("100", date(2026, 10, 12)))
            .await
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        WorkflowError::Precondition {
            status: TradeStatus::Draft,
            ..
        }
    ));
}

// ============================================================================
// Batch validation
// ============================================================================

#[tokio::test]
async fn test_non_positive_net_weight_is_rejected() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;

    let mut input = batch("100", date(2026, 10, 12));
    input.tare_weight_kg = input.gross_weight_kg;

    let err = workflow_err(
        h.engine
            .deliveries()
            .record_delivery(trade.id, input)
            .await
            .unwrap_err(),
    );
    assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "net_weight_kg"));
}

#[tokio::test]
async fn test_delivery_before_loading_is_rejected() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;

    let mut input = batch("100", date(2026, 10, 12));
    input.loading_date = date(2026, 10, 13);

    let err = workflow_err(
        h.engine
            .deliveries()
            .record_delivery(trade.id, input)
            .await
            .unwrap_err(),
    );
    assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "delivery_date"));
    assert_eq!(
        h.engine.deliveries().get_progress(trade.id).await.unwrap().batch_count,
        0
    );
}

#[tokio::test]
async fn test_trade_beyond_quantity_limit_is_refused() {
    let h = Harness::new();
    let mut input = trade_input("1000", PaymentTerms::immediate(0));
    input.ordered_quantity_kg = dec("100000000000000000000");
    input.price_per_kg = dec("10000000000");

    let err = workflow_err(h.engine.trades().create(input).await.unwrap_err());
    assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "ordered_quantity_kg"));
}

#[tokio::test]
async fn test_largest_trade_delivers_without_overflow() {
    let h = Harness::new();
    let mut input = trade_input("999000000", PaymentTerms::new(ScheduleType::Weekly, 7));
    input.price_per_kg = dec("1000000");
    let trade = h.approved(input).await;

    let result = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("999000000", date(2026, 10, 13)))
        .await
        .unwrap();
    assert_eq!(result.batch.value, dec("999000000000000"));
    assert!(result.progress.is_fully_delivered);
}

#[tokio::test]
async fn test_value_overflow_is_rejected_without_recording() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;

    // A stored price beyond anything validation admits
    let mut stored = trade.clone();
    stored.price_per_kg = Decimal::MAX;
    let expected = stored.version;
    stored.version += 1;
    h.store.update_trade(&stored, expected).await.unwrap();

    let err = workflow_err(
        h.engine
            .deliveries()
            .record_delivery(trade.id, batch("500", date(2026, 10, 13)))
            .await
            .unwrap_err(),
    );
    assert!(matches!(err, WorkflowError::Validation { ref field, .. } if field == "net_weight_kg"));

    let progress = h.engine.deliveries().get_progress(trade.id).await.unwrap();
    assert_eq!(progress.batch_count, 0);
    assert_eq!(
        h.engine.trades().get(trade.id).await.unwrap().status,
        TradeStatus::ReadyForDelivery
    );
}

// ============================================================================
// Invoice destination
// ============================================================================

#[tokio::test]
async fn test_immediate_terms_issue_invoice_in_same_call() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(10)).await;

    let result = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("400", date(2026, 10, 13)))
        .await
        .unwrap();

    let invoice = result.issued_invoice.expect("invoice issued with the delivery");
    assert_eq!(invoice.kind, InvoiceKind::Immediate);
    assert_eq!(invoice.due_date, date(2026, 10, 23));
    assert_eq!(invoice.total_amount, dec("180"));
    assert_eq!(result.batch.invoice_ref, InvoiceRef::Invoice(invoice.id));
    assert!(matches!(result.invoice_target, InvoiceTarget::Immediate { .. }));
    assert!(h.store.periods_for_customer(trade.buyer_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_twice_weekly_tuesday_delivery_joins_wednesday_period() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::new(ScheduleType::TwiceWeekly, 7)).await;

    // 2026-10-13 is a Tuesday
    let result = h
        .engine
        .deliveries()
        .record_delivery(trade.id, batch("600", date(2026, 10, 13)))
        .await
        .unwrap();

    assert!(result.issued_invoice.is_none());
    match result.invoice_target {
        InvoiceTarget::Period {
            key,
            period_id,
            finalize_date,
            due_date,
        } => {
            assert_eq!(key.boundary, date(2026, 10, 14));
            assert_eq!(finalize_date, date(2026, 10, 14));
            assert_eq!(due_date, date(2026, 10, 21));
            assert_eq!(result.batch.invoice_ref, InvoiceRef::Period(period_id.unwrap()));
        }
        other => panic!("expected period target, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batches_of_same_customer_share_open_period() {
    let h = Harness::new();
    let first = h.ready("1000", PaymentTerms::new(ScheduleType::Weekly, 7)).await;
    let mut input = sibling_input(&first, "500");
    input.buyer_id = first.buyer_id;
    let second = h.approved(input).await;

    let deliveries = h.engine.deliveries();
    let a = deliveries
        .record_delivery(first.id, batch("200", date(2026, 10, 12)))
        .await
        .unwrap();
    let b = deliveries
        .record_delivery(second.id, batch("300", date(2026, 10, 16)))
        .await
        .unwrap();

    assert_eq!(a.batch.invoice_ref, b.batch.invoice_ref);
    let periods = h.store.periods_for_customer(first.buyer_id).unwrap();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].batch_ids, vec![a.batch.id, b.batch.id]);
    assert_eq!(periods[0].amount, dec("225"));
}

#[tokio::test]
async fn test_list_batches_in_insertion_order() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;
    let deliveries = h.engine.deliveries();

    let mut ids = Vec::new();
    for net in ["100", "200", "300"] {
        ids.push(
            deliveries
                .record_delivery(trade.id, batch(net, date(2026, 10, 12)))
                .await
                .unwrap()
                .batch
                .id,
        );
    }

    let listed: Vec<_> = deliveries
        .list_batches(trade.id)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(listed, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_never_overflow() {
    let h = Harness::new();
    let trade = h.ready("1000", PaymentTerms::immediate(0)).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let deliveries = h.engine.deliveries();
        let trade_id = trade.id;
        tasks.push(tokio::spawn(async move {
            deliveries
                .record_delivery(trade_id, batch("300", date(2026, 10, 12)))
                .await
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 3);
    let progress = h.engine.deliveries().get_progress(trade.id).await.unwrap();
    assert_eq!(progress.delivered_kg, dec("900"));
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Delivered quantity stays within the order whatever batches arrive
    #[test]
    fn prop_delivered_never_exceeds_ordered(
        ordered in 100u32..5_000,
        weights in prop::collection::vec(1u32..2_000, 1..12),
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let trade = h.ready(&ordered.to_string(), PaymentTerms::immediate(0)).await;
            let deliveries = h.engine.deliveries();

            for weight in weights {
                let before = deliveries.get_progress(trade.id).await.unwrap();
                let outcome = deliveries
                    .record_delivery(trade.id, batch(&weight.to_string(), date(2026, 10, 12)))
                    .await;
                let after = deliveries.get_progress(trade.id).await.unwrap();

                prop_assert!(after.delivered_kg <= after.ordered_kg);
                match outcome {
                    Ok(_) => prop_assert_eq!(after.delivered_kg, before.delivered_kg + dec(&weight.to_string())),
                    Err(_) => prop_assert_eq!(after.delivered_kg, before.delivered_kg),
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
