//! Stock ledger and variant projection
//!
//! Every stock change is appended to the movement ledger first and then
//! applied to the variant's cached `on_hand_quantity`. The counter write is a
//! compare-and-set on the variant version, retried a bounded number of times,
//! so two writers touching the same variant never lose each other's update.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use shared::{
    apply_clamped, NewStockMovement, ProductVariant, PurchaseItem, ReferenceType, StockAudit,
    StockMovement,
};

use super::journal::MutationJournal;
use crate::config::ReconciliationConfig;
use crate::error::{AppError, AppResult};
use crate::store::ReconciliationStore;

/// Ledger service owning all writes to stock movements and variant counters
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn ReconciliationStore>,
    max_projection_retries: u32,
}

/// Input for a manual stock adjustment
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustStockInput {
    pub product_variant_id: Uuid,
    /// Signed change; positive adds stock
    pub quantity_change: i32,
    pub notes: Option<String>,
}

/// Input for registering a variant with an opening balance
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVariantInput {
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub sku: Option<String>,
    #[serde(default)]
    pub opening_quantity: i32,
}

impl StockLedger {
    /// Create a new StockLedger instance
    pub fn new(store: Arc<dyn ReconciliationStore>, settings: &ReconciliationConfig) -> Self {
        Self {
            store,
            max_projection_retries: settings.max_projection_retries,
        }
    }

    /// Append one movement and apply it to the variant's counter
    pub async fn record(&self, movement: NewStockMovement) -> AppResult<StockMovement> {
        if movement.quantity <= 0 {
            return Err(AppError::validation(
                "quantity",
                "Movement quantity must be positive",
            ));
        }
        self.require_variant(movement.product_variant_id).await?;

        let variant_id = movement.product_variant_id;
        let delta = movement.signed_quantity();
        let mut journal =
            MutationJournal::new("record_stock_movement", movement.reference_id.unwrap_or(variant_id));

        let recorded = movement.into_movement(Uuid::new_v4(), Utc::now());
        journal
            .step("append_movement", self.store.insert_movement(&recorded))
            .await?;
        let on_hand = journal
            .step("apply_projection", self.apply_delta(variant_id, delta))
            .await?;

        tracing::debug!(
            variant_id = %variant_id,
            movement_id = %recorded.id,
            movement_type = recorded.movement_type.as_str(),
            quantity = recorded.quantity,
            on_hand,
            "stock movement recorded"
        );

        Ok(recorded)
    }

    /// Record several movements for one reference; a failure after the first
    /// lands is reported as a partial failure
    pub async fn record_batch(
        &self,
        operation: &'static str,
        reference_id: Uuid,
        movements: Vec<NewStockMovement>,
    ) -> AppResult<Vec<StockMovement>> {
        let mut journal = MutationJournal::new(operation, reference_id);
        let mut recorded = Vec::with_capacity(movements.len());
        for movement in movements {
            recorded.push(journal.step("record_movement", self.record(movement)).await?);
        }
        Ok(recorded)
    }

    /// One `in` movement per line item of a received purchase
    pub async fn receive_items(
        &self,
        purchase_id: Uuid,
        items: &[PurchaseItem],
        note: &str,
    ) -> AppResult<Vec<StockMovement>> {
        let movements = items
            .iter()
            .map(|item| {
                NewStockMovement::purchase_in(
                    item.product_variant_id,
                    item.quantity,
                    purchase_id,
                    Some(note.to_string()),
                )
            })
            .collect();
        self.record_batch("receive_purchase_items", purchase_id, movements)
            .await
    }

    /// One `out` movement per line item, reversing a receipt or recording a return
    pub async fn reverse_items(
        &self,
        purchase_id: Uuid,
        items: &[PurchaseItem],
        note: &str,
    ) -> AppResult<Vec<StockMovement>> {
        let movements = items
            .iter()
            .map(|item| {
                NewStockMovement::purchase_out(
                    item.product_variant_id,
                    item.quantity,
                    purchase_id,
                    Some(note.to_string()),
                )
            })
            .collect();
        self.record_batch("reverse_purchase_items", purchase_id, movements)
            .await
    }

    /// Manual stock adjustment, recorded as an `adjustment` movement
    pub async fn adjust_stock(&self, input: AdjustStockInput) -> AppResult<StockMovement> {
        if input.quantity_change == 0 {
            return Err(AppError::validation(
                "quantity_change",
                "Adjustment must change the quantity",
            ));
        }

        let movement = self
            .record(NewStockMovement::adjustment(
                input.product_variant_id,
                input.quantity_change,
                input.notes,
            ))
            .await?;

        tracing::info!(
            variant_id = %input.product_variant_id,
            quantity_change = input.quantity_change,
            "manual stock adjustment recorded"
        );

        Ok(movement)
    }

    /// Register a variant; a positive opening balance is booked as an adjustment
    pub async fn create_variant(&self, input: CreateVariantInput) -> AppResult<ProductVariant> {
        if input.opening_quantity < 0 {
            return Err(AppError::validation(
                "opening_quantity",
                "Opening quantity cannot be negative",
            ));
        }

        let variant = ProductVariant {
            id: Uuid::new_v4(),
            product_id: input.product_id,
            color: input.color,
            size: input.size,
            sku: input.sku,
            on_hand_quantity: 0,
            version: 1,
            is_active: true,
        };
        self.store.insert_variant(&variant).await?;

        if input.opening_quantity > 0 {
            self.record(NewStockMovement::adjustment(
                variant.id,
                input.opening_quantity,
                Some("Opening balance".to_string()),
            ))
            .await?;
        }

        self.require_variant(variant.id).await
    }

    /// Cached on-hand quantity of a variant
    pub async fn current_stock(&self, variant_id: Uuid) -> AppResult<i32> {
        Ok(self.require_variant(variant_id).await?.on_hand_quantity)
    }

    pub async fn list_variants(&self) -> AppResult<Vec<ProductVariant>> {
        self.store.list_variants().await
    }

    pub async fn movements_for_variant(&self, variant_id: Uuid) -> AppResult<Vec<StockMovement>> {
        self.require_variant(variant_id).await?;
        self.store.movements_for_variant(variant_id).await
    }

    pub async fn movements_for_purchase(&self, purchase_id: Uuid) -> AppResult<Vec<StockMovement>> {
        self.store
            .movements_for_reference(ReferenceType::Purchase, purchase_id)
            .await
    }

    /// Recompute a variant's balance from the ledger and compare with the counter
    pub async fn audit_variant(&self, variant_id: Uuid) -> AppResult<StockAudit> {
        let variant = self.require_variant(variant_id).await?;
        let movements = self.store.movements_for_variant(variant_id).await?;
        Ok(StockAudit::new(&variant, &movements))
    }

    /// Audit every variant
    pub async fn audit_all(&self) -> AppResult<Vec<StockAudit>> {
        let mut audits = Vec::new();
        for variant in self.store.list_variants().await? {
            let movements = self.store.movements_for_variant(variant.id).await?;
            let audit = StockAudit::new(&variant, &movements);
            if !audit.is_consistent() {
                tracing::warn!(
                    variant_id = %variant.id,
                    on_hand = audit.on_hand_quantity,
                    ledger_balance = audit.ledger_balance,
                    "stock projection disagrees with ledger"
                );
            }
            audits.push(audit);
        }
        Ok(audits)
    }

    /// Fail with a validation error naming the first unknown variant
    pub async fn ensure_variants_exist(&self, variant_ids: &[Uuid]) -> AppResult<()> {
        for (index, variant_id) in variant_ids.iter().enumerate() {
            if self.store.get_variant(*variant_id).await?.is_none() {
                return Err(AppError::validation(
                    format!("items[{}].product_variant_id", index),
                    format!("Unknown product variant {}", variant_id),
                ));
            }
        }
        Ok(())
    }

    async fn require_variant(&self, variant_id: Uuid) -> AppResult<ProductVariant> {
        self.store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Product variant".to_string()))
    }

    /// Compare-and-set loop on the variant counter
    async fn apply_delta(&self, variant_id: Uuid, delta: i64) -> AppResult<i32> {
        for attempt in 0..=self.max_projection_retries {
            let variant = self.require_variant(variant_id).await?;
            let next = apply_clamped(variant.on_hand_quantity, delta);

            if i64::from(variant.on_hand_quantity) + delta < 0 {
                tracing::warn!(
                    variant_id = %variant_id,
                    on_hand = variant.on_hand_quantity,
                    delta,
                    "stock decrement clamped at zero"
                );
            }

            if self
                .store
                .compare_and_set_on_hand(variant_id, variant.version, next)
                .await?
            {
                return Ok(next);
            }

            tracing::debug!(variant_id = %variant_id, attempt, "projection write lost a race");
            tokio::task::yield_now().await;
        }

        Err(AppError::conflict(
            "Product variant",
            format!(
                "stock for variant {} kept changing; gave up after {} retries",
                variant_id, self.max_projection_retries
            ),
        ))
    }
}
