//! Persistence boundary of the reconciliation engine
//!
//! The services never talk to a database directly; they go through
//! [`ReconciliationStore`], which exposes single-row writes, point reads and
//! the conditional updates the engine relies on for concurrency control:
//! [`ReconciliationStore::claim_revision`] on purchases,
//! [`ReconciliationStore::insert_return`] on the purchase being returned and
//! [`ReconciliationStore::compare_and_set_on_hand`] on variant counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shared::{IdempotencyKey, ProductVariant, Purchase, PurchaseItem, ReferenceType, StockMovement};

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> AppResult<()>;

    // Purchases

    /// Persist a purchase header; `purchase.items` is ignored
    async fn insert_purchase(&self, purchase: &Purchase) -> AppResult<()>;

    /// Live purchase with its items, `None` when missing or tombstoned
    async fn get_purchase(&self, id: Uuid) -> AppResult<Option<Purchase>>;

    /// Live purchases with items, newest first
    async fn list_purchases(&self) -> AppResult<Vec<Purchase>>;

    /// Live return records pointing at `original_id`
    async fn list_returns_for(&self, original_id: Uuid) -> AppResult<Vec<Purchase>>;

    /// Bump `version` iff it still equals `expected_version`
    async fn claim_revision(&self, id: Uuid, expected_version: i64) -> AppResult<bool>;

    /// Insert a return record with its items iff the original is live and
    /// still at `original_version`, bumping the original's version in the
    /// same write; returns whether the claim won
    async fn insert_return(
        &self,
        original_id: Uuid,
        original_version: i64,
        record: &Purchase,
        items: &[PurchaseItem],
    ) -> AppResult<bool>;

    /// Overwrite header columns; does not touch `version` or items
    async fn update_purchase_header(&self, purchase: &Purchase) -> AppResult<()>;

    async fn tombstone_purchase(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    async fn delete_purchase(&self, id: Uuid) -> AppResult<()>;

    // Line items

    async fn insert_items(&self, items: &[PurchaseItem]) -> AppResult<()>;

    async fn delete_items(&self, purchase_id: Uuid) -> AppResult<()>;

    // Ledger

    async fn insert_movement(&self, movement: &StockMovement) -> AppResult<()>;

    /// Movements for a variant, oldest first
    async fn movements_for_variant(&self, variant_id: Uuid) -> AppResult<Vec<StockMovement>>;

    /// Movements caused by one reference, oldest first
    async fn movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<Vec<StockMovement>>;

    async fn delete_movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<u64>;

    // Projection

    async fn insert_variant(&self, variant: &ProductVariant) -> AppResult<()>;

    async fn get_variant(&self, id: Uuid) -> AppResult<Option<ProductVariant>>;

    async fn list_variants(&self) -> AppResult<Vec<ProductVariant>>;

    /// Write `new_quantity` iff the variant is still at `expected_version`; bumps the version
    async fn compare_and_set_on_hand(
        &self,
        id: Uuid,
        expected_version: i64,
        new_quantity: i32,
    ) -> AppResult<bool>;

    // Idempotency

    async fn find_intent(&self, key: &IdempotencyKey) -> AppResult<Option<Uuid>>;

    async fn save_intent(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        purchase_id: Uuid,
    ) -> AppResult<()>;
}
