//! In-memory store
//!
//! Used by tests and by the server when no database URL is configured.
//! Failures can be injected per operation to exercise partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use shared::{IdempotencyKey, ProductVariant, Purchase, PurchaseItem, ReferenceType, StockMovement};

use super::ReconciliationStore;
use crate::error::{AppError, AppResult};

/// Store operations that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertPurchase,
    ClaimRevision,
    InsertReturn,
    UpdatePurchaseHeader,
    TombstonePurchase,
    DeletePurchase,
    InsertItems,
    DeleteItems,
    InsertMovement,
    DeleteMovements,
    CompareAndSet,
    SaveIntent,
}

#[derive(Default)]
struct State {
    purchases: HashMap<Uuid, (u64, Purchase)>,
    items: Vec<PurchaseItem>,
    movements: Vec<StockMovement>,
    variants: HashMap<Uuid, ProductVariant>,
    intents: HashMap<String, Uuid>,
    armed_failures: HashSet<StoreOp>,
    contention: HashMap<Uuid, u32>,
    next_seq: u64,
}

impl State {
    fn check(&mut self, op: StoreOp) -> AppResult<()> {
        if self.armed_failures.remove(&op) {
            return Err(AppError::Persistence(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }

    /// Consume one phantom write queued for `id`
    fn take_contention(&mut self, id: Uuid) -> bool {
        match self.contention.get_mut(&id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn with_items(&self, header: &Purchase) -> Purchase {
        let mut purchase = header.clone();
        purchase.items = self
            .items
            .iter()
            .filter(|item| item.purchase_id == header.id)
            .cloned()
            .collect();
        purchase
    }

    fn live_sorted(&self, filter: impl Fn(&Purchase) -> bool) -> Vec<Purchase> {
        let mut rows: Vec<&(u64, Purchase)> = self
            .purchases
            .values()
            .filter(|(_, p)| p.deleted_at.is_none() && filter(p))
            .collect();
        rows.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(&a.0)));
        rows.into_iter().map(|(_, p)| self.with_items(p)).collect()
    }
}

/// Thread-safe in-memory implementation of [`ReconciliationStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with a persistence error
    pub fn fail_next(&self, op: StoreOp) {
        self.state.lock().armed_failures.insert(op);
    }

    /// Make the next `times` compare-and-set attempts on `variant_id` lose to a phantom writer
    pub fn contend_on_variant(&self, variant_id: Uuid, times: u32) {
        self.state.lock().contention.insert(variant_id, times);
    }

    /// Make the next `times` return inserts against `purchase_id` lose to a phantom writer
    pub fn contend_on_purchase(&self, purchase_id: Uuid, times: u32) {
        self.state.lock().contention.insert(purchase_id, times);
    }

    /// Every movement in the ledger, including those of tombstoned purchases
    pub fn all_movements(&self) -> Vec<StockMovement> {
        self.state.lock().movements.clone()
    }

    /// Raw header lookup that ignores tombstones
    pub fn purchase_row(&self, id: Uuid) -> Option<Purchase> {
        let state = self.state.lock();
        state.purchases.get(&id).map(|(_, p)| state.with_items(p))
    }

    pub fn item_count(&self, purchase_id: Uuid) -> usize {
        self.state
            .lock()
            .items
            .iter()
            .filter(|item| item.purchase_id == purchase_id)
            .count()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn insert_purchase(&self, purchase: &Purchase) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::InsertPurchase)?;
        if state.purchases.contains_key(&purchase.id) {
            return Err(AppError::Persistence(format!(
                "duplicate purchase id {}",
                purchase.id
            )));
        }
        let mut header = purchase.clone();
        header.items.clear();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.purchases.insert(purchase.id, (seq, header));
        Ok(())
    }

    async fn get_purchase(&self, id: Uuid) -> AppResult<Option<Purchase>> {
        let state = self.state.lock();
        Ok(state
            .purchases
            .get(&id)
            .filter(|(_, p)| p.deleted_at.is_none())
            .map(|(_, p)| state.with_items(p)))
    }

    async fn list_purchases(&self) -> AppResult<Vec<Purchase>> {
        Ok(self.state.lock().live_sorted(|_| true))
    }

    async fn list_returns_for(&self, original_id: Uuid) -> AppResult<Vec<Purchase>> {
        Ok(self
            .state
            .lock()
            .live_sorted(|p| p.return_of == Some(original_id)))
    }

    async fn claim_revision(&self, id: Uuid, expected_version: i64) -> AppResult<bool> {
        let mut state = self.state.lock();
        state.check(StoreOp::ClaimRevision)?;
        match state.purchases.get_mut(&id) {
            Some((_, purchase))
                if purchase.deleted_at.is_none() && purchase.version == expected_version =>
            {
                purchase.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_return(
        &self,
        original_id: Uuid,
        original_version: i64,
        record: &Purchase,
        items: &[PurchaseItem],
    ) -> AppResult<bool> {
        let mut state = self.state.lock();
        state.check(StoreOp::InsertReturn)?;
        if state.purchases.contains_key(&record.id) {
            return Err(AppError::Persistence(format!(
                "duplicate purchase id {}",
                record.id
            )));
        }

        let phantom_writer = state.take_contention(original_id);
        let Some((_, original)) = state.purchases.get_mut(&original_id) else {
            return Ok(false);
        };
        if phantom_writer {
            original.version += 1;
            return Ok(false);
        }
        if original.deleted_at.is_some() || original.version != original_version {
            return Ok(false);
        }
        original.version += 1;

        let mut header = record.clone();
        header.items.clear();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.purchases.insert(record.id, (seq, header));
        state.items.extend_from_slice(items);
        Ok(true)
    }

    async fn update_purchase_header(&self, purchase: &Purchase) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::UpdatePurchaseHeader)?;
        let (_, row) = state
            .purchases
            .get_mut(&purchase.id)
            .ok_or_else(|| AppError::Persistence(format!("purchase {} vanished", purchase.id)))?;
        row.date = purchase.date;
        row.supplier_id = purchase.supplier_id;
        row.invoice_number = purchase.invoice_number.clone();
        row.payment_status = purchase.payment_status;
        row.subtotal = purchase.subtotal;
        row.total = purchase.total;
        row.notes = purchase.notes.clone();
        row.updated_at = purchase.updated_at;
        Ok(())
    }

    async fn tombstone_purchase(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::TombstonePurchase)?;
        if let Some((_, row)) = state.purchases.get_mut(&id) {
            row.deleted_at = Some(at);
            row.updated_at = at;
        }
        Ok(())
    }

    async fn delete_purchase(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::DeletePurchase)?;
        state.purchases.remove(&id);
        Ok(())
    }

    async fn insert_items(&self, items: &[PurchaseItem]) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::InsertItems)?;
        state.items.extend_from_slice(items);
        Ok(())
    }

    async fn delete_items(&self, purchase_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::DeleteItems)?;
        state.items.retain(|item| item.purchase_id != purchase_id);
        Ok(())
    }

    async fn insert_movement(&self, movement: &StockMovement) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::InsertMovement)?;
        state.movements.push(movement.clone());
        Ok(())
    }

    async fn movements_for_variant(&self, variant_id: Uuid) -> AppResult<Vec<StockMovement>> {
        Ok(self
            .state
            .lock()
            .movements
            .iter()
            .filter(|m| m.product_variant_id == variant_id)
            .cloned()
            .collect())
    }

    async fn movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<Vec<StockMovement>> {
        Ok(self
            .state
            .lock()
            .movements
            .iter()
            .filter(|m| m.reference_type == reference_type && m.reference_id == Some(reference_id))
            .cloned()
            .collect())
    }

    async fn delete_movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<u64> {
        let mut state = self.state.lock();
        state.check(StoreOp::DeleteMovements)?;
        let before = state.movements.len();
        state.movements.retain(|m| {
            !(m.reference_type == reference_type && m.reference_id == Some(reference_id))
        });
        Ok((before - state.movements.len()) as u64)
    }

    async fn insert_variant(&self, variant: &ProductVariant) -> AppResult<()> {
        self.state.lock().variants.insert(variant.id, variant.clone());
        Ok(())
    }

    async fn get_variant(&self, id: Uuid) -> AppResult<Option<ProductVariant>> {
        Ok(self.state.lock().variants.get(&id).cloned())
    }

    async fn list_variants(&self) -> AppResult<Vec<ProductVariant>> {
        let mut variants: Vec<ProductVariant> =
            self.state.lock().variants.values().cloned().collect();
        variants.sort_by(|a, b| a.sku.cmp(&b.sku).then(a.id.cmp(&b.id)));
        Ok(variants)
    }

    async fn compare_and_set_on_hand(
        &self,
        id: Uuid,
        expected_version: i64,
        new_quantity: i32,
    ) -> AppResult<bool> {
        let mut state = self.state.lock();
        state.check(StoreOp::CompareAndSet)?;

        let phantom_writer = state.take_contention(id);

        let Some(variant) = state.variants.get_mut(&id) else {
            return Ok(false);
        };
        if phantom_writer {
            variant.version += 1;
            return Ok(false);
        }
        if variant.version != expected_version {
            return Ok(false);
        }
        variant.on_hand_quantity = new_quantity;
        variant.version += 1;
        Ok(true)
    }

    async fn find_intent(&self, key: &IdempotencyKey) -> AppResult<Option<Uuid>> {
        Ok(self.state.lock().intents.get(key.as_str()).copied())
    }

    async fn save_intent(
        &self,
        key: &IdempotencyKey,
        _operation: &str,
        purchase_id: Uuid,
    ) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check(StoreOp::SaveIntent)?;
        state.intents.insert(key.as_str().to_string(), purchase_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(on_hand: i32) -> ProductVariant {
        ProductVariant {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            color: "navy".into(),
            size: "L".into(),
            sku: Some("TEE-NAVY-L".into()),
            on_hand_quantity: on_hand,
            version: 1,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = MemoryStore::new();
        let v = variant(10);
        store.insert_variant(&v).await.unwrap();

        assert!(store.compare_and_set_on_hand(v.id, 1, 12).await.unwrap());
        assert!(!store.compare_and_set_on_hand(v.id, 1, 99).await.unwrap());

        let stored = store.get_variant(v.id).await.unwrap().unwrap();
        assert_eq!(stored.on_hand_quantity, 12);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::DeleteItems);
        assert!(store.delete_items(Uuid::new_v4()).await.is_err());
        assert!(store.delete_items(Uuid::new_v4()).await.is_ok());
    }

    fn purchase(version: i64, return_of: Option<Uuid>) -> Purchase {
        let now = Utc::now();
        Purchase {
            id: Uuid::new_v4(),
            date: now.date_naive(),
            supplier_id: Uuid::new_v4(),
            invoice_number: None,
            payment_status: shared::PaymentStatus::Pending,
            subtotal: rust_decimal::Decimal::ZERO,
            total: rust_decimal::Decimal::ZERO,
            notes: None,
            return_of,
            version,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_return_claims_original_version() {
        let store = MemoryStore::new();
        let original = purchase(3, None);
        store.insert_purchase(&original).await.unwrap();

        let stale = purchase(1, Some(original.id));
        assert!(!store.insert_return(original.id, 2, &stale, &[]).await.unwrap());
        assert!(store.get_purchase(stale.id).await.unwrap().is_none());

        let record = purchase(1, Some(original.id));
        assert!(store.insert_return(original.id, 3, &record, &[]).await.unwrap());
        assert!(store.get_purchase(record.id).await.unwrap().is_some());
        assert_eq!(store.purchase_row(original.id).unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_phantom_writer_bumps_version() {
        let store = MemoryStore::new();
        let v = variant(3);
        store.insert_variant(&v).await.unwrap();
        store.contend_on_variant(v.id, 1);

        assert!(!store.compare_and_set_on_hand(v.id, 1, 4).await.unwrap());
        assert!(store.compare_and_set_on_hand(v.id, 2, 4).await.unwrap());
    }
}
