//! Purchase reconciliation service
//!
//! Turns purchase create, update and delete requests into line item writes,
//! stock ledger entries and projection updates. A purchase moves stock only
//! while it is `received`: entering that state applies its items, leaving it
//! reverses them, and editing the items of a received purchase reverses the
//! old set before applying the new one.
//!
//! None of the steps share a transaction. Each operation runs its writes
//! through a [`MutationJournal`] so that a failure half-way is reported as a
//! partial failure naming what already landed.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{
    purchase_subtotal, quantities_by_variant, validate_line_items, validate_supplier,
    IdempotencyKey, LineItemInput, PaymentStatus, Purchase, PurchaseHeaderInput, PurchaseItem,
    ReferenceType,
};

use super::journal::MutationJournal;
use super::notification::NotificationSink;
use super::returns::{label, CreateReturnInput, ReturnHandler};
use super::stock_ledger::StockLedger;
use crate::config::ReconciliationConfig;
use crate::error::{AppError, AppResult};
use crate::store::ReconciliationStore;

/// Purchase lifecycle service
#[derive(Clone)]
pub struct PurchaseService {
    store: Arc<dyn ReconciliationStore>,
    ledger: StockLedger,
    returns: ReturnHandler,
    notifier: Arc<dyn NotificationSink>,
    retain_history_on_delete: bool,
}

/// Input for creating a purchase
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePurchaseInput {
    #[serde(flatten)]
    pub header: PurchaseHeaderInput,
    pub items: Vec<LineItemInput>,
    pub status: PaymentStatus,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Full replacement of a purchase's header, items and status
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePurchaseInput {
    #[serde(flatten)]
    pub header: PurchaseHeaderInput,
    pub items: Vec<LineItemInput>,
    pub status: PaymentStatus,
    /// Version the caller last read; defaults to the version read fresh
    pub expected_version: Option<i64>,
    pub idempotency_key: Option<IdempotencyKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeletePurchaseInput {
    pub expected_version: Option<i64>,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Stock effect of moving a purchase from one state to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Emit `out` movements for the items currently persisted
    pub reverse_old: bool,
    /// Emit `in` movements for the replacement items
    pub apply_new: bool,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        !self.reverse_old && !self.apply_new
    }
}

/// Decide which movement sets an edit produces
///
/// `old_quantities` and `new_quantities` are per-variant totals as returned by
/// [`quantities_by_variant`]. A received purchase whose totals are unchanged
/// produces nothing; changed totals reverse the old set and apply the new one.
pub fn plan_reconciliation(
    old_status: PaymentStatus,
    old_quantities: &[(Uuid, i32)],
    new_status: PaymentStatus,
    new_quantities: &[(Uuid, i32)],
) -> ReconciliationPlan {
    let was_received = old_status == PaymentStatus::Received;
    let is_received = new_status == PaymentStatus::Received;

    match (was_received, is_received) {
        (false, false) => ReconciliationPlan {
            reverse_old: false,
            apply_new: false,
        },
        (false, true) => ReconciliationPlan {
            reverse_old: false,
            apply_new: true,
        },
        (true, false) => ReconciliationPlan {
            reverse_old: true,
            apply_new: false,
        },
        (true, true) => {
            let changed = old_quantities != new_quantities;
            ReconciliationPlan {
                reverse_old: changed,
                apply_new: changed,
            }
        }
    }
}

/// Whether a persisted purchase already reflects an update request
fn matches_request(purchase: &Purchase, input: &UpdatePurchaseInput) -> bool {
    purchase.payment_status == input.status
        && purchase.date == input.header.date
        && purchase.supplier_id == input.header.supplier_id
        && purchase.invoice_number == input.header.invoice_number
        && purchase.notes == input.header.notes
        && purchase.quantities_by_variant()
            == quantities_by_variant(
                input
                    .items
                    .iter()
                    .map(|item| (item.product_variant_id, item.quantity)),
            )
}

impl PurchaseService {
    /// Create a new PurchaseService instance
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        notifier: Arc<dyn NotificationSink>,
        settings: &ReconciliationConfig,
    ) -> Self {
        let ledger = StockLedger::new(store.clone(), settings);
        let returns = ReturnHandler::new(store.clone(), ledger.clone(), settings);
        Self {
            store,
            ledger,
            returns,
            notifier,
            retain_history_on_delete: settings.retain_history_on_delete,
        }
    }

    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// Get a live purchase with its items
    pub async fn get_purchase(&self, id: Uuid) -> AppResult<Purchase> {
        self.store
            .get_purchase(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Purchase".to_string()))
    }

    /// List live purchases, newest first
    pub async fn list_purchases(&self) -> AppResult<Vec<Purchase>> {
        self.store.list_purchases().await
    }

    /// Create a purchase; a `received` purchase brings its items into stock
    pub async fn create_purchase(&self, input: CreatePurchaseInput) -> AppResult<Purchase> {
        let result = self.create_inner(input).await;
        self.report("create_purchase", None, "Purchase created", result)
    }

    /// Replace a purchase's header, items and status, reconciling stock
    pub async fn update_purchase(
        &self,
        id: Uuid,
        input: UpdatePurchaseInput,
    ) -> AppResult<Purchase> {
        let result = self.update_inner(id, input).await;
        self.report("update_purchase", Some(id), "Purchase updated", result)
    }

    /// Delete a purchase, first undoing whatever stock it still holds
    pub async fn delete_purchase(&self, id: Uuid, input: DeletePurchaseInput) -> AppResult<()> {
        let result = self.delete_inner(id, input).await;
        self.report("delete_purchase", Some(id), "Purchase deleted", result)
    }

    /// Record a return against an existing purchase
    pub async fn create_return(
        &self,
        original_id: Uuid,
        input: CreateReturnInput,
    ) -> AppResult<Purchase> {
        let result = self.returns.create_return(original_id, input).await;
        self.report("create_return", Some(original_id), "Return recorded", result)
    }

    async fn create_inner(&self, input: CreatePurchaseInput) -> AppResult<Purchase> {
        self.validate_request(&input.header, &input.items).await?;

        if let Some(key) = &input.idempotency_key {
            if let Some(existing_id) = self.store.find_intent(key).await? {
                tracing::info!(idempotency_key = %key, purchase_id = %existing_id, "purchase already created");
                return self.get_purchase(existing_id).await;
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let subtotal = purchase_subtotal(&input.items);
        let items: Vec<PurchaseItem> = input
            .items
            .iter()
            .map(|item| PurchaseItem::from_input(id, item, now))
            .collect();

        let mut purchase = Purchase {
            id,
            date: input.header.date,
            supplier_id: input.header.supplier_id,
            invoice_number: input.header.invoice_number,
            payment_status: input.status,
            subtotal,
            total: subtotal,
            notes: input.header.notes,
            return_of: None,
            version: 1,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        };

        let mut journal = MutationJournal::new("create_purchase", id);
        journal
            .step("insert_purchase", self.store.insert_purchase(&purchase))
            .await?;
        journal
            .step("insert_items", self.store.insert_items(&items))
            .await?;
        if purchase.is_received() {
            let note = format!("Received purchase {}", label(&purchase));
            journal
                .step("receive_items", self.ledger.receive_items(id, &items, &note))
                .await?;
        }
        if let Some(key) = &input.idempotency_key {
            journal
                .step("save_intent", self.store.save_intent(key, "create_purchase", id))
                .await?;
        }

        tracing::info!(
            purchase_id = %id,
            status = %purchase.payment_status,
            lines = items.len(),
            "purchase created"
        );

        purchase.items = items;
        Ok(purchase)
    }

    async fn update_inner(&self, id: Uuid, input: UpdatePurchaseInput) -> AppResult<Purchase> {
        let existing = self.get_purchase(id).await?;
        if existing.is_return() {
            return Err(AppError::validation(
                "return_of",
                "Return records cannot be edited",
            ));
        }
        self.validate_request(&input.header, &input.items).await?;

        let derived_key = input.idempotency_key.is_none();
        let key = input
            .idempotency_key
            .clone()
            .or_else(|| input.expected_version.map(|v| IdempotencyKey::for_edit(id, v)));
        if let Some(key) = &key {
            if self.store.find_intent(key).await?.is_some() {
                // A derived key only identifies the revision, not the edit.
                // Another editor at the same revision has to see a conflict.
                if derived_key && !matches_request(&existing, &input) {
                    return Err(AppError::conflict(
                        "Purchase",
                        format!("purchase {} was already edited at this version", id),
                    ));
                }
                tracing::info!(idempotency_key = %key, purchase_id = %id, "purchase edit already applied");
                return Ok(existing);
            }
        }

        let expected_version = input.expected_version.unwrap_or(existing.version);
        let new_quantities = quantities_by_variant(
            input
                .items
                .iter()
                .map(|item| (item.product_variant_id, item.quantity)),
        );
        let plan = plan_reconciliation(
            existing.payment_status,
            &existing.quantities_by_variant(),
            input.status,
            &new_quantities,
        );

        let now = Utc::now();
        let subtotal = purchase_subtotal(&input.items);
        let items: Vec<PurchaseItem> = input
            .items
            .iter()
            .map(|item| PurchaseItem::from_input(id, item, now))
            .collect();

        let mut updated = Purchase {
            id,
            date: input.header.date,
            supplier_id: input.header.supplier_id,
            invoice_number: input.header.invoice_number,
            payment_status: input.status,
            subtotal,
            total: subtotal,
            notes: input.header.notes,
            return_of: None,
            version: expected_version + 1,
            deleted_at: None,
            created_at: existing.created_at,
            updated_at: now,
            items: Vec::new(),
        };

        let mut journal = MutationJournal::new("update_purchase", id);
        journal
            .step("claim_revision", self.claim(id, expected_version))
            .await?;
        if plan.reverse_old {
            let note = format!("Reversed purchase {}", label(&existing));
            journal
                .step(
                    "reverse_previous_items",
                    self.ledger.reverse_items(id, &existing.items, &note),
                )
                .await?;
        }
        journal.step("delete_items", self.store.delete_items(id)).await?;
        journal
            .step("insert_items", self.store.insert_items(&items))
            .await?;
        if plan.apply_new {
            let note = format!("Received purchase {}", label(&updated));
            journal
                .step("receive_items", self.ledger.receive_items(id, &items, &note))
                .await?;
        }
        journal
            .step("update_header", self.store.update_purchase_header(&updated))
            .await?;
        if let Some(key) = &key {
            journal
                .step("save_intent", self.store.save_intent(key, "update_purchase", id))
                .await?;
        }

        tracing::info!(
            purchase_id = %id,
            from = %existing.payment_status,
            to = %updated.payment_status,
            reversed = plan.reverse_old,
            applied = plan.apply_new,
            "purchase updated"
        );

        updated.items = items;
        Ok(updated)
    }

    async fn delete_inner(&self, id: Uuid, input: DeletePurchaseInput) -> AppResult<()> {
        let key = input
            .idempotency_key
            .clone()
            .or_else(|| input.expected_version.map(|v| IdempotencyKey::for_delete(id, v)));
        if let Some(key) = &key {
            if self.store.find_intent(key).await?.is_some() {
                tracing::info!(idempotency_key = %key, purchase_id = %id, "purchase already deleted");
                return Ok(());
            }
        }

        let existing = self.get_purchase(id).await?;
        let expected_version = input.expected_version.unwrap_or(existing.version);

        let mut journal = MutationJournal::new("delete_purchase", id);
        journal
            .step("claim_revision", self.claim(id, expected_version))
            .await?;
        if existing.is_received() {
            let note = format!("Reversed deleted purchase {}", label(&existing));
            journal
                .step(
                    "reverse_items",
                    self.ledger.reverse_items(id, &existing.items, &note),
                )
                .await?;
        }
        if existing.is_return() {
            let note = format!("Voided return {}", existing.id);
            journal
                .step(
                    "restore_returned_items",
                    self.ledger.receive_items(id, &existing.items, &note),
                )
                .await?;
        }

        if self.retain_history_on_delete {
            journal
                .step(
                    "tombstone_purchase",
                    self.store.tombstone_purchase(id, Utc::now()),
                )
                .await?;
        } else {
            let removed = journal
                .step(
                    "delete_movements",
                    self.store
                        .delete_movements_for_reference(ReferenceType::Purchase, id),
                )
                .await?;
            tracing::debug!(purchase_id = %id, removed, "purged purchase movements");
            journal.step("delete_items", self.store.delete_items(id)).await?;
            journal
                .step("delete_purchase", self.store.delete_purchase(id))
                .await?;
        }
        if let Some(key) = &key {
            journal
                .step("save_intent", self.store.save_intent(key, "delete_purchase", id))
                .await?;
        }

        tracing::info!(
            purchase_id = %id,
            status = %existing.payment_status,
            retained_history = self.retain_history_on_delete,
            "purchase deleted"
        );

        Ok(())
    }

    /// Bump the purchase's version, or fail with a conflict when it moved on
    async fn claim(&self, id: Uuid, expected_version: i64) -> AppResult<()> {
        if self.store.claim_revision(id, expected_version).await? {
            return Ok(());
        }
        Err(AppError::conflict(
            "Purchase",
            format!(
                "purchase {} is no longer at version {}",
                id, expected_version
            ),
        ))
    }

    /// Shape checks plus variant existence, all before any write
    async fn validate_request(
        &self,
        header: &PurchaseHeaderInput,
        items: &[LineItemInput],
    ) -> AppResult<()> {
        header.validate()?;
        validate_supplier(header.supplier_id)
            .map_err(|message| AppError::validation("supplier_id", message))?;
        validate_line_items(items)?;

        let variant_ids: Vec<Uuid> = items.iter().map(|i| i.product_variant_id).collect();
        self.ledger.ensure_variants_exist(&variant_ids).await
    }

    /// Forward the outcome to the notification sink
    fn report<T>(
        &self,
        operation: &'static str,
        purchase_id: Option<Uuid>,
        success: &str,
        result: AppResult<T>,
    ) -> AppResult<T> {
        match &result {
            Ok(_) => self.notifier.success(success),
            Err(err) => {
                if err.is_persistence() {
                    tracing::error!(operation, purchase_id = ?purchase_id, error = %err, "purchase operation failed");
                } else {
                    tracing::warn!(operation, purchase_id = ?purchase_id, error = %err, "purchase operation rejected");
                }
                self.notifier.failure(&err.user_message());
            }
        }
        result
    }
}
