//! Purchase return tests
//!
//! Returns are new records linked to the original purchase. These tests cover
//! the record's shape, cumulative return limits and idempotent retries.

mod common;

use chrono::Utc;
use common::{create_input, item, Harness};
use shared::{IdempotencyKey, LineItemInput, PaymentStatus};
use stock_reconciliation::services::{CreateReturnInput, DeletePurchaseInput};
use stock_reconciliation::{AppError, ReconciliationConfig};
use uuid::Uuid;

fn return_of(items: Vec<LineItemInput>) -> CreateReturnInput {
    CreateReturnInput {
        items,
        notes: None,
        idempotency_key: None,
    }
}

// ============================================================================
// Return Records
// ============================================================================

#[tokio::test]
async fn test_return_record_links_to_original() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 1000)]))
        .await
        .unwrap();

    let mut input = return_of(vec![item(v, 2, 1000)]);
    input.notes = Some("Two arrived torn".to_string());
    let record = h.service.create_return(original.id, input).await.unwrap();

    assert_eq!(record.return_of, Some(original.id));
    assert_eq!(record.payment_status, PaymentStatus::Returned);
    assert_eq!(record.supplier_id, original.supplier_id);
    assert_eq!(record.invoice_number, original.invoice_number);
    assert_eq!(record.date, Utc::now().date_naive());
    assert_eq!(record.total, rust_decimal::Decimal::from(2000));
    assert_eq!(
        record.notes.as_deref(),
        Some("Return of purchase INV-1001\nTwo arrived torn")
    );

    // The original keeps its data; only its version moves
    let stored = h.service.get_purchase(original.id).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Received);
    assert_eq!(stored.items, original.items);
    assert_eq!(stored.version, original.version + 1);
    assert_eq!(h.on_hand(v).await, 3);
}

#[tokio::test]
async fn test_return_against_missing_purchase_is_not_found() {
    let h = Harness::new();
    let v = h.variant(5).await;
    let result = h
        .service
        .create_return(Uuid::new_v4(), return_of(vec![item(v, 1, 10)]))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(h.on_hand(v).await, 5);
}

#[tokio::test]
async fn test_return_against_deleted_purchase_is_not_found() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Pending, vec![item(v, 5, 10)]))
        .await
        .unwrap();
    h.service
        .delete_purchase(original.id, DeletePurchaseInput::default())
        .await
        .unwrap();

    let result = h
        .service
        .create_return(original.id, return_of(vec![item(v, 1, 10)]))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_return_of_a_return_is_rejected() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();
    let record = h
        .service
        .create_return(original.id, return_of(vec![item(v, 1, 10)]))
        .await
        .unwrap();

    let result = h
        .service
        .create_return(record.id, return_of(vec![item(v, 1, 10)]))
        .await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
}

#[tokio::test]
async fn test_empty_return_is_rejected() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();

    let result = h.service.create_return(original.id, return_of(vec![])).await;
    assert!(matches!(
        result,
        Err(AppError::Validation { ref field, .. }) if field == "items"
    ));
}

// ============================================================================
// Return Limits
// ============================================================================

#[tokio::test]
async fn test_cumulative_returns_cannot_exceed_original() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();

    h.service
        .create_return(original.id, return_of(vec![item(v, 3, 10)]))
        .await
        .unwrap();
    let over = h
        .service
        .create_return(original.id, return_of(vec![item(v, 3, 10)]))
        .await;
    assert!(matches!(over, Err(AppError::Validation { .. })));
    assert_eq!(h.on_hand(v).await, 2);

    h.service
        .create_return(original.id, return_of(vec![item(v, 2, 10)]))
        .await
        .unwrap();
    assert_eq!(h.on_hand(v).await, 0);
    h.assert_consistent().await;
}

/// Duplicate lines for one variant count together
#[tokio::test]
async fn test_split_lines_are_summed_against_limit() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 4, 10)]))
        .await
        .unwrap();

    let result = h
        .service
        .create_return(original.id, return_of(vec![item(v, 3, 10), item(v, 2, 10)]))
        .await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
}

#[tokio::test]
async fn test_variant_outside_original_is_rejected() {
    let h = Harness::new();
    let bought = h.variant(0).await;
    let other = h.variant(10).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(bought, 5, 10)]))
        .await
        .unwrap();

    let result = h
        .service
        .create_return(original.id, return_of(vec![item(other, 1, 10)]))
        .await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
    assert_eq!(h.on_hand(other).await, 10);
}

/// Voided returns no longer count against the limit
#[tokio::test]
async fn test_deleted_return_frees_its_quantity() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();
    let first = h
        .service
        .create_return(original.id, return_of(vec![item(v, 5, 10)]))
        .await
        .unwrap();
    h.service
        .delete_purchase(first.id, DeletePurchaseInput::default())
        .await
        .unwrap();

    h.service
        .create_return(original.id, return_of(vec![item(v, 5, 10)]))
        .await
        .unwrap();
    assert_eq!(h.on_hand(v).await, 0);
    h.assert_consistent().await;
}

#[tokio::test]
async fn test_limits_can_be_disabled() {
    let h = Harness::with_settings(ReconciliationConfig {
        enforce_return_limits: false,
        ..ReconciliationConfig::default()
    });
    let v = h.variant(10).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 2, 10)]))
        .await
        .unwrap();

    h.service
        .create_return(original.id, return_of(vec![item(v, 6, 10)]))
        .await
        .unwrap();
    assert_eq!(h.on_hand(v).await, 6);
}

// ============================================================================
// Concurrent Returns
// ============================================================================

/// Another write lands on the original between the limit check and the insert
#[tokio::test]
async fn test_return_conflicts_when_original_moves() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();
    h.store.contend_on_purchase(original.id, 1);

    let result = h
        .service
        .create_return(original.id, return_of(vec![item(v, 5, 10)]))
        .await;

    assert!(matches!(result, Err(AppError::ConcurrencyConflict { .. })));
    assert_eq!(h.on_hand(v).await, 5);
    assert_eq!(h.service.list_purchases().await.unwrap().len(), 1);

    // Re-reading the original lets the retry through
    h.service
        .create_return(original.id, return_of(vec![item(v, 5, 10)]))
        .await
        .unwrap();
    assert_eq!(h.on_hand(v).await, 0);
    h.assert_consistent().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_returns_stay_within_original() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = h.service.clone();
        let original_id = original.id;
        handles.push(tokio::spawn(async move {
            service
                .create_return(original_id, return_of(vec![item(v, 1, 10)]))
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AppError::Validation { .. }) | Err(AppError::ConcurrencyConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert!(accepted <= 5);
    assert_eq!(h.on_hand(v).await, 5 - accepted);
    h.assert_consistent().await;
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_return_retry_with_key_applies_once() {
    let h = Harness::new();
    let v = h.variant(0).await;
    let original = h
        .service
        .create_purchase(create_input(PaymentStatus::Received, vec![item(v, 5, 10)]))
        .await
        .unwrap();

    let mut input = return_of(vec![item(v, 2, 10)]);
    input.idempotency_key = Some(IdempotencyKey::from_token("rma-7781"));
    let first = h.service.create_return(original.id, input.clone()).await.unwrap();
    let second = h.service.create_return(original.id, input).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.on_hand(v).await, 3);
    assert_eq!(h.purchase_movements(first.id).await.len(), 1);
}
