//! Shared fixtures for the reconciliation integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{LineItemInput, PaymentStatus, PurchaseHeaderInput, StockMovement};
use stock_reconciliation::services::{
    CreatePurchaseInput, CreateVariantInput, PurchaseService, RecordingNotifier, StockLedger,
    UpdatePurchaseInput,
};
use stock_reconciliation::store::MemoryStore;
use stock_reconciliation::ReconciliationConfig;

/// Services wired to an in-memory store and a recording notifier
pub struct Harness {
    pub store: MemoryStore,
    pub notifier: RecordingNotifier,
    pub service: PurchaseService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReconciliationConfig::default())
    }

    pub fn with_settings(settings: ReconciliationConfig) -> Self {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let service = PurchaseService::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            &settings,
        );
        Self {
            store,
            notifier,
            service,
        }
    }

    pub fn ledger(&self) -> &StockLedger {
        self.service.ledger()
    }

    /// Register a variant whose opening stock is booked in the ledger
    pub async fn variant(&self, opening_quantity: i32) -> Uuid {
        self.ledger()
            .create_variant(CreateVariantInput {
                product_id: Uuid::new_v4(),
                color: "black".to_string(),
                size: "M".to_string(),
                sku: Some(format!("SKU-{}", Uuid::new_v4().simple())),
                opening_quantity,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn on_hand(&self, variant_id: Uuid) -> i32 {
        self.ledger().current_stock(variant_id).await.unwrap()
    }

    pub async fn purchase_movements(&self, purchase_id: Uuid) -> Vec<StockMovement> {
        self.ledger().movements_for_purchase(purchase_id).await.unwrap()
    }

    /// Every variant's counter equals its recomputed ledger balance
    pub async fn assert_consistent(&self) {
        for audit in self.ledger().audit_all().await.unwrap() {
            assert!(
                audit.is_consistent(),
                "variant {} has on_hand {} but ledger balance {}",
                audit.product_variant_id,
                audit.on_hand_quantity,
                audit.ledger_balance
            );
        }
    }
}

pub fn header() -> PurchaseHeaderInput {
    PurchaseHeaderInput {
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        supplier_id: Uuid::from_u128(0x5u128),
        invoice_number: Some("INV-1001".to_string()),
        notes: None,
    }
}

pub fn item(variant_id: Uuid, quantity: i32, unit_cost: i64) -> LineItemInput {
    LineItemInput::new(variant_id, quantity, Decimal::from(unit_cost))
}

pub fn create_input(status: PaymentStatus, items: Vec<LineItemInput>) -> CreatePurchaseInput {
    CreatePurchaseInput {
        header: header(),
        items,
        status,
        idempotency_key: None,
    }
}

pub fn update_input(status: PaymentStatus, items: Vec<LineItemInput>) -> UpdatePurchaseInput {
    UpdatePurchaseInput {
        header: header(),
        items,
        status,
        expected_version: None,
        idempotency_key: None,
    }
}
