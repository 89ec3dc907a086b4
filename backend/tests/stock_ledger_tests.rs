//! Stock ledger and projection tests
//!
//! Tests for the ledger including:
//! - Clamping of the projection at zero and the deficit visible in audits
//! - Manual adjustments and opening balances
//! - Ledger-projection consistency over random operation sequences

mod common;

use common::{create_input, item, update_input, Harness};
use proptest::prelude::*;
use shared::{Direction, MovementType, PaymentStatus, ReferenceType};
use stock_reconciliation::services::{
    AdjustStockInput, CreateReturnInput, CreateVariantInput, DeletePurchaseInput,
};
use stock_reconciliation::AppError;
use uuid::Uuid;

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Returning more than is on hand floors the counter at zero
    #[tokio::test]
    async fn test_decrement_below_zero_is_clamped() {
        let h = Harness::new();
        let v = h.variant(1).await;
        let original = h
            .service
            .create_purchase(create_input(PaymentStatus::Pending, vec![item(v, 4, 10)]))
            .await
            .unwrap();

        h.service
            .create_return(
                original.id,
                CreateReturnInput {
                    items: vec![item(v, 4, 10)],
                    notes: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(h.on_hand(v).await, 0);
    }

    /// The ledger keeps the full magnitude, so the deficit shows up in audits
    #[tokio::test]
    async fn test_audit_exposes_clamped_deficit() {
        let h = Harness::new();
        let v = h.variant(3).await;

        h.ledger()
            .adjust_stock(AdjustStockInput {
                product_variant_id: v,
                quantity_change: -5,
                notes: Some("Shrinkage".to_string()),
            })
            .await
            .unwrap();

        let audit = h.ledger().audit_variant(v).await.unwrap();
        assert_eq!(audit.on_hand_quantity, 0);
        assert_eq!(audit.ledger_balance, -2);
        assert_eq!(audit.discrepancy, 2);
        assert_eq!(audit.totals.adjustment_in, 3);
        assert_eq!(audit.totals.adjustment_out, 5);
        assert!(!audit.is_consistent());

        let flagged: Vec<Uuid> = h
            .ledger()
            .audit_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| !a.is_consistent())
            .map(|a| a.product_variant_id)
            .collect();
        assert_eq!(flagged, vec![v]);
    }

    #[tokio::test]
    async fn test_adjustment_writes_ledger_entry() {
        let h = Harness::new();
        let v = h.variant(0).await;

        let movement = h
            .ledger()
            .adjust_stock(AdjustStockInput {
                product_variant_id: v,
                quantity_change: 12,
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(movement.movement_type, MovementType::Adjustment);
        assert_eq!(movement.direction, Direction::In);
        assert_eq!(movement.quantity, 12);
        assert_eq!(movement.reference_type, ReferenceType::Adjustment);
        assert_eq!(h.on_hand(v).await, 12);
        assert_eq!(h.ledger().movements_for_variant(v).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_adjustment_rejected() {
        let h = Harness::new();
        let v = h.variant(2).await;
        let result = h
            .ledger()
            .adjust_stock(AdjustStockInput {
                product_variant_id: v,
                quantity_change: 0,
                notes: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert_eq!(h.ledger().movements_for_variant(v).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_variant_is_not_found() {
        let h = Harness::new();
        let missing = Uuid::new_v4();

        assert!(matches!(
            h.ledger().current_stock(missing).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.ledger()
                .adjust_stock(AdjustStockInput {
                    product_variant_id: missing,
                    quantity_change: 1,
                    notes: None,
                })
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_opening_balance_is_booked_as_adjustment() {
        let h = Harness::new();
        let variant = h
            .ledger()
            .create_variant(CreateVariantInput {
                product_id: Uuid::new_v4(),
                color: "red".to_string(),
                size: "L".to_string(),
                sku: None,
                opening_quantity: 9,
            })
            .await
            .unwrap();

        assert_eq!(variant.on_hand_quantity, 9);
        let movements = h.ledger().movements_for_variant(variant.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Adjustment);
        assert_eq!(movements[0].notes.as_deref(), Some("Opening balance"));
    }

    #[tokio::test]
    async fn test_negative_opening_balance_rejected() {
        let h = Harness::new();
        let result = h
            .ledger()
            .create_variant(CreateVariantInput {
                product_id: Uuid::new_v4(),
                color: "red".to_string(),
                size: "L".to_string(),
                sku: None,
                opening_quantity: -1,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert!(h.ledger().list_variants().await.unwrap().is_empty());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Create { variant: usize, quantity: i32, status: usize },
        Update { purchase: usize, quantity: i32, status: usize },
        Delete { purchase: usize },
        Return { purchase: usize, quantity: i32 },
        Adjust { variant: usize, change: i32 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 1..20i32, 0..5usize)
                .prop_map(|(variant, quantity, status)| Op::Create { variant, quantity, status }),
            (0..8usize, 1..20i32, 0..5usize)
                .prop_map(|(purchase, quantity, status)| Op::Update { purchase, quantity, status }),
            (0..8usize).prop_map(|purchase| Op::Delete { purchase }),
            (0..8usize, 1..20i32).prop_map(|(purchase, quantity)| Op::Return { purchase, quantity }),
            (0..3usize, -20..20i32).prop_map(|(variant, change)| Op::Adjust { variant, change }),
        ]
    }

    /// Applies the operations; rejected ones (limits, deleted targets) are skipped
    async fn run(h: &Harness, variants: &[Uuid], ops: Vec<Op>) -> Result<(), TestCaseError> {
        let mut purchases: Vec<(Uuid, Uuid)> = Vec::new();

        for op in ops {
            let result = match op {
                Op::Create { variant, quantity, status } => {
                    let v = variants[variant];
                    h.service
                        .create_purchase(create_input(
                            PaymentStatus::ALL[status],
                            vec![item(v, quantity, 10)],
                        ))
                        .await
                        .map(|p| purchases.push((p.id, v)))
                }
                Op::Update { purchase, quantity, status } => match purchases.get(purchase) {
                    Some(&(id, v)) => h
                        .service
                        .update_purchase(
                            id,
                            update_input(PaymentStatus::ALL[status], vec![item(v, quantity, 10)]),
                        )
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                },
                Op::Delete { purchase } => match purchases.get(purchase) {
                    Some(&(id, _)) => h
                        .service
                        .delete_purchase(id, DeletePurchaseInput::default())
                        .await,
                    None => Ok(()),
                },
                Op::Return { purchase, quantity } => match purchases.get(purchase) {
                    Some(&(id, v)) => h
                        .service
                        .create_return(
                            id,
                            CreateReturnInput {
                                items: vec![item(v, quantity, 10)],
                                notes: None,
                                idempotency_key: None,
                            },
                        )
                        .await
                        .map(|_| ()),
                    None => Ok(()),
                },
                Op::Adjust { variant, change } if change != 0 => h
                    .ledger()
                    .adjust_stock(shared_adjust(variants[variant], change))
                    .await
                    .map(|_| ()),
                Op::Adjust { .. } => Ok(()),
            };

            if let Err(err) = result {
                prop_assert!(
                    !err.is_persistence(),
                    "unexpected store failure: {:?}",
                    err
                );
            }
        }

        for audit in h.ledger().audit_all().await.unwrap() {
            prop_assert!(audit.on_hand_quantity >= 0);
            prop_assert_eq!(
                i64::from(audit.on_hand_quantity),
                audit.ledger_balance,
                "variant {} drifted from its ledger",
                audit.product_variant_id
            );
        }
        Ok(())
    }

    fn shared_adjust(product_variant_id: Uuid, quantity_change: i32) -> AdjustStockInput {
        AdjustStockInput {
            product_variant_id,
            quantity_change,
            notes: None,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Counter equals recomputed ledger balance after any operation sequence
        #[test]
        fn prop_projection_matches_ledger(ops in prop::collection::vec(op_strategy(), 1..30)) {
            tokio_test::block_on(async {
                let h = Harness::new();
                // Large opening stock keeps every decrement above zero
                let mut variants = Vec::new();
                for _ in 0..3 {
                    variants.push(h.variant(1_000).await);
                }
                run(&h, &variants, ops).await
            })?;
        }
    }
}
