//! Purchase returns
//!
//! A return never edits the purchase it refers to. It is recorded as a new
//! purchase-shaped record with status `returned` and `return_of` pointing at
//! the original, and it takes the returned quantities out of stock. Inserting
//! the record bumps the original's version, so two returns checked against
//! the same prior returns cannot both land.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{
    purchase_subtotal, returnable_quantities, validate_line_items, validate_return_limits,
    IdempotencyKey, LineItemInput, PaymentStatus, Purchase, PurchaseItem,
};

use super::journal::MutationJournal;
use super::stock_ledger::StockLedger;
use crate::config::ReconciliationConfig;
use crate::error::{AppError, AppResult};
use crate::store::ReconciliationStore;

/// Records returns against existing purchases
#[derive(Clone)]
pub struct ReturnHandler {
    store: Arc<dyn ReconciliationStore>,
    ledger: StockLedger,
    enforce_limits: bool,
}

/// Items being sent back to the supplier
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateReturnInput {
    pub items: Vec<LineItemInput>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl ReturnHandler {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        ledger: StockLedger,
        settings: &ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            enforce_limits: settings.enforce_return_limits,
        }
    }

    pub async fn create_return(
        &self,
        original_id: Uuid,
        input: CreateReturnInput,
    ) -> AppResult<Purchase> {
        input.validate()?;
        validate_line_items(&input.items)?;

        if let Some(key) = &input.idempotency_key {
            if let Some(existing_id) = self.store.find_intent(key).await? {
                tracing::info!(idempotency_key = %key, return_id = %existing_id, "return already recorded");
                return self
                    .store
                    .get_purchase(existing_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Return".to_string()));
            }
        }

        let original = self
            .store
            .get_purchase(original_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Purchase".to_string()))?;
        if original.is_return() {
            return Err(AppError::validation(
                "return_of",
                "A return cannot itself be returned",
            ));
        }

        let variant_ids: Vec<Uuid> = input.items.iter().map(|i| i.product_variant_id).collect();
        self.ledger.ensure_variants_exist(&variant_ids).await?;

        if self.enforce_limits {
            let prior_returns = self.store.list_returns_for(original_id).await?;
            let remaining = returnable_quantities(&original, &prior_returns);
            validate_return_limits(&remaining, &input.items)?;
        }

        let now = Utc::now();
        let return_id = Uuid::new_v4();
        let subtotal = purchase_subtotal(&input.items);
        let items: Vec<PurchaseItem> = input
            .items
            .iter()
            .map(|item| PurchaseItem::from_input(return_id, item, now))
            .collect();

        let mut record = Purchase {
            id: return_id,
            date: now.date_naive(),
            supplier_id: original.supplier_id,
            invoice_number: original.invoice_number.clone(),
            payment_status: PaymentStatus::Returned,
            subtotal,
            total: subtotal,
            notes: Some(return_notes(&original, input.notes.as_deref())),
            return_of: Some(original_id),
            version: 1,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        };

        let mut journal = MutationJournal::new("create_return", return_id);
        journal
            .step(
                "insert_return",
                self.insert_claimed(&original, &record, &items),
            )
            .await?;
        journal
            .step(
                "reverse_returned_items",
                self.ledger
                    .reverse_items(return_id, &items, &format!("Return of purchase {}", label(&original))),
            )
            .await?;
        if let Some(key) = &input.idempotency_key {
            journal
                .step("save_intent", self.store.save_intent(key, "create_return", return_id))
                .await?;
        }

        tracing::info!(
            return_id = %return_id,
            original_id = %original_id,
            lines = items.len(),
            "purchase return recorded"
        );

        record.items = items;
        Ok(record)
    }

    /// Store the record only if the original has not moved since it was read,
    /// which keeps the return limit check valid
    async fn insert_claimed(
        &self,
        original: &Purchase,
        record: &Purchase,
        items: &[PurchaseItem],
    ) -> AppResult<()> {
        if self
            .store
            .insert_return(original.id, original.version, record, items)
            .await?
        {
            return Ok(());
        }
        Err(AppError::conflict(
            "Purchase",
            format!(
                "purchase {} changed while the return was being recorded",
                original.id
            ),
        ))
    }
}

/// Invoice number when there is one, otherwise the id
pub(crate) fn label(purchase: &Purchase) -> String {
    purchase
        .invoice_number
        .clone()
        .unwrap_or_else(|| purchase.id.to_string())
}

fn return_notes(original: &Purchase, caller_notes: Option<&str>) -> String {
    let backlink = format!("Return of purchase {}", label(original));
    match caller_notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{}\n{}", backlink, notes),
        None => backlink,
    }
}
