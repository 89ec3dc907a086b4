//! PostgreSQL store backed by sqlx

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgArguments, query::Query, FromRow, PgPool, Postgres};
use uuid::Uuid;

use async_trait::async_trait;
use shared::{
    Direction, IdempotencyKey, MovementType, PaymentStatus, ProductVariant, Purchase,
    PurchaseItem, ReferenceType, StockMovement,
};

use super::ReconciliationStore;
use crate::error::{AppError, AppResult};

/// Store over a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    /// Create a new PgStore instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Row for purchase header queries
#[derive(Debug, FromRow)]
struct PurchaseRow {
    id: Uuid,
    date: NaiveDate,
    supplier_id: Uuid,
    invoice_number: Option<String>,
    payment_status: String,
    subtotal: Decimal,
    total: Decimal,
    notes: Option<String>,
    return_of: Option<Uuid>,
    version: i64,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for Purchase {
    type Error = AppError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        Ok(Purchase {
            id: row.id,
            date: row.date,
            supplier_id: row.supplier_id,
            invoice_number: row.invoice_number,
            payment_status: row
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(AppError::Persistence)?,
            subtotal: row.subtotal,
            total: row.total,
            notes: row.notes,
            return_of: row.return_of,
            version: row.version,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            items: Vec::new(),
        })
    }
}

/// Row for purchase item queries
#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    purchase_id: Uuid,
    product_variant_id: Uuid,
    quantity: i32,
    unit_cost: Decimal,
    line_subtotal: Decimal,
    created_at: DateTime<Utc>,
}

impl From<ItemRow> for PurchaseItem {
    fn from(row: ItemRow) -> Self {
        PurchaseItem {
            id: row.id,
            purchase_id: row.purchase_id,
            product_variant_id: row.product_variant_id,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            line_subtotal: row.line_subtotal,
            created_at: row.created_at,
        }
    }
}

/// Row for stock movement queries
#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    product_variant_id: Uuid,
    movement_type: String,
    direction: String,
    quantity: i32,
    reference_type: String,
    reference_id: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: row.id,
            product_variant_id: row.product_variant_id,
            movement_type: row
                .movement_type
                .parse::<MovementType>()
                .map_err(AppError::Persistence)?,
            direction: row.direction.parse::<Direction>().map_err(AppError::Persistence)?,
            quantity: row.quantity,
            reference_type: row
                .reference_type
                .parse::<ReferenceType>()
                .map_err(AppError::Persistence)?,
            reference_id: row.reference_id,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

/// Row for product variant queries
#[derive(Debug, FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    color: String,
    size: String,
    sku: Option<String>,
    on_hand_quantity: i32,
    version: i64,
    is_active: bool,
}

impl From<VariantRow> for ProductVariant {
    fn from(row: VariantRow) -> Self {
        ProductVariant {
            id: row.id,
            product_id: row.product_id,
            color: row.color,
            size: row.size,
            sku: row.sku,
            on_hand_quantity: row.on_hand_quantity,
            version: row.version,
            is_active: row.is_active,
        }
    }
}

const PURCHASE_COLUMNS: &str = "id, date, supplier_id, invoice_number, payment_status, subtotal, total, \
     notes, return_of, version, deleted_at, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, purchase_id, product_variant_id, quantity, unit_cost, line_subtotal, created_at";

const MOVEMENT_COLUMNS: &str = "id, product_variant_id, movement_type, direction, quantity, \
     reference_type, reference_id, notes, created_at";

const VARIANT_COLUMNS: &str =
    "id, product_id, color, size, sku, on_hand_quantity, version, is_active";

impl PgStore {
    async fn attach_items(&self, rows: Vec<PurchaseRow>) -> AppResult<Vec<Purchase>> {
        let mut purchases = rows
            .into_iter()
            .map(Purchase::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        if purchases.is_empty() {
            return Ok(purchases);
        }

        let ids: Vec<Uuid> = purchases.iter().map(|p| p.id).collect();
        let items = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {} FROM purchase_items WHERE purchase_id = ANY($1) ORDER BY seq",
            ITEM_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        for item in items {
            if let Some(purchase) = purchases.iter_mut().find(|p| p.id == item.purchase_id) {
                purchase.items.push(item.into());
            }
        }
        Ok(purchases)
    }
}

fn insert_purchase_query(purchase: &Purchase) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO purchases (
            id, date, supplier_id, invoice_number, payment_status, subtotal, total,
            notes, return_of, version, deleted_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(purchase.id)
    .bind(purchase.date)
    .bind(purchase.supplier_id)
    .bind(&purchase.invoice_number)
    .bind(purchase.payment_status.as_str())
    .bind(purchase.subtotal)
    .bind(purchase.total)
    .bind(&purchase.notes)
    .bind(purchase.return_of)
    .bind(purchase.version)
    .bind(purchase.deleted_at)
    .bind(purchase.created_at)
    .bind(purchase.updated_at)
}

fn insert_item_query(item: &PurchaseItem) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO purchase_items (
            id, purchase_id, product_variant_id, quantity, unit_cost, line_subtotal, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(item.id)
    .bind(item.purchase_id)
    .bind(item.product_variant_id)
    .bind(item.quantity)
    .bind(item.unit_cost)
    .bind(item.line_subtotal)
    .bind(item.created_at)
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn insert_purchase(&self, purchase: &Purchase) -> AppResult<()> {
        insert_purchase_query(purchase).execute(&self.db).await?;
        Ok(())
    }

    async fn get_purchase(&self, id: Uuid) -> AppResult<Option<Purchase>> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {} FROM purchases WHERE id = $1 AND deleted_at IS NULL",
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(self.attach_items(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_purchases(&self) -> AppResult<Vec<Purchase>> {
        let rows = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {} FROM purchases WHERE deleted_at IS NULL ORDER BY created_at DESC, seq DESC",
            PURCHASE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        self.attach_items(rows).await
    }

    async fn list_returns_for(&self, original_id: Uuid) -> AppResult<Vec<Purchase>> {
        let rows = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {} FROM purchases WHERE return_of = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, seq DESC",
            PURCHASE_COLUMNS
        ))
        .bind(original_id)
        .fetch_all(&self.db)
        .await?;

        self.attach_items(rows).await
    }

    async fn claim_revision(&self, id: Uuid, expected_version: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET version = version + 1
            WHERE id = $1 AND version = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_return(
        &self,
        original_id: Uuid,
        original_version: i64,
        record: &Purchase,
        items: &[PurchaseItem],
    ) -> AppResult<bool> {
        let mut tx = self.db.begin().await?;

        // The row lock taken here serializes returns against one original
        let claimed = sqlx::query(
            r#"
            UPDATE purchases
            SET version = version + 1
            WHERE id = $1 AND version = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(original_id)
        .bind(original_version)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_purchase_query(record).execute(&mut *tx).await?;
        for item in items {
            insert_item_query(item).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn update_purchase_header(&self, purchase: &Purchase) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE purchases
            SET date = $1, supplier_id = $2, invoice_number = $3, payment_status = $4,
                subtotal = $5, total = $6, notes = $7, updated_at = $8
            WHERE id = $9
            "#,
        )
        .bind(purchase.date)
        .bind(purchase.supplier_id)
        .bind(&purchase.invoice_number)
        .bind(purchase.payment_status.as_str())
        .bind(purchase.subtotal)
        .bind(purchase.total)
        .bind(&purchase.notes)
        .bind(purchase.updated_at)
        .bind(purchase.id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn tombstone_purchase(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE purchases SET deleted_at = $1, updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_purchase(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM purchases WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_items(&self, items: &[PurchaseItem]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        for item in items {
            insert_item_query(item).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_items(&self, purchase_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM purchase_items WHERE purchase_id = $1")
            .bind(purchase_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_movement(&self, movement: &StockMovement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_variant_id, movement_type, direction, quantity,
                reference_type, reference_id, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(movement.id)
        .bind(movement.product_variant_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.direction.as_str())
        .bind(movement.quantity)
        .bind(movement.reference_type.as_str())
        .bind(movement.reference_id)
        .bind(&movement.notes)
        .bind(movement.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn movements_for_variant(&self, variant_id: Uuid) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {} FROM stock_movements WHERE product_variant_id = $1 ORDER BY seq",
            MOVEMENT_COLUMNS
        ))
        .bind(variant_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(StockMovement::try_from).collect()
    }

    async fn movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {} FROM stock_movements WHERE reference_type = $1 AND reference_id = $2 ORDER BY seq",
            MOVEMENT_COLUMNS
        ))
        .bind(reference_type.as_str())
        .bind(reference_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(StockMovement::try_from).collect()
    }

    async fn delete_movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM stock_movements WHERE reference_type = $1 AND reference_id = $2",
        )
        .bind(reference_type.as_str())
        .bind(reference_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_variant(&self, variant: &ProductVariant) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_variants (
                id, product_id, color, size, sku, on_hand_quantity, version, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(variant.id)
        .bind(variant.product_id)
        .bind(&variant.color)
        .bind(&variant.size)
        .bind(&variant.sku)
        .bind(variant.on_hand_quantity)
        .bind(variant.version)
        .bind(variant.is_active)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_variant(&self, id: Uuid) -> AppResult<Option<ProductVariant>> {
        let row = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {} FROM product_variants WHERE id = $1",
            VARIANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_variants(&self) -> AppResult<Vec<ProductVariant>> {
        let rows = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {} FROM product_variants ORDER BY sku NULLS LAST, id",
            VARIANT_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn compare_and_set_on_hand(
        &self,
        id: Uuid,
        expected_version: i64,
        new_quantity: i32,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE product_variants
            SET on_hand_quantity = $1, version = version + 1
            WHERE id = $2 AND version = $3
            "#,
        )
        .bind(new_quantity)
        .bind(id)
        .bind(expected_version)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_intent(&self, key: &IdempotencyKey) -> AppResult<Option<Uuid>> {
        let purchase_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT purchase_id FROM idempotency_intents WHERE key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(purchase_id)
    }

    async fn save_intent(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        purchase_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_intents (key, operation, purchase_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(operation)
        .bind(purchase_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
