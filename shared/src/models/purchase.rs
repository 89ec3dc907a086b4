//! Purchase order models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A purchase order from a supplier, with its line items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Purchase {
    pub id: Uuid,
    pub date: NaiveDate,
    pub supplier_id: Uuid,
    pub invoice_number: Option<String>,
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    /// Equal to `subtotal`; no tax or shipping is modelled
    pub total: Decimal,
    pub notes: Option<String>,
    /// Set on return records; points at the purchase being returned
    pub return_of: Option<Uuid>,
    /// Optimistic concurrency token, bumped on every edit
    pub version: i64,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
}

impl Purchase {
    /// Whether this purchase currently contributes received stock
    pub fn is_received(&self) -> bool {
        self.payment_status == PaymentStatus::Received
    }

    pub fn is_return(&self) -> bool {
        self.return_of.is_some()
    }

    /// Quantities keyed by variant, summed over line items
    pub fn quantities_by_variant(&self) -> Vec<(Uuid, i32)> {
        quantities_by_variant(self.items.iter().map(|i| (i.product_variant_id, i.quantity)))
    }
}

/// One product variant quantity within a purchase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseItem {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub product_variant_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
    pub line_subtotal: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PurchaseItem {
    /// Build a persisted line item from caller input
    pub fn from_input(purchase_id: Uuid, input: &LineItemInput, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            purchase_id,
            product_variant_id: input.product_variant_id,
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            line_subtotal: line_subtotal(input.quantity, input.unit_cost),
            created_at,
        }
    }
}

/// Payment and lifecycle status of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Received,
    Paid,
    Cancelled,
    Returned,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Received,
        PaymentStatus::Paid,
        PaymentStatus::Cancelled,
        PaymentStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Received => "received",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "received" => Ok(PaymentStatus::Received),
            "paid" => Ok(PaymentStatus::Paid),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "returned" => Ok(PaymentStatus::Returned),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Header fields supplied when creating or editing a purchase
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseHeaderInput {
    pub date: NaiveDate,
    pub supplier_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "Invoice number must be 1-64 characters"))]
    pub invoice_number: Option<String>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// A requested line item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItemInput {
    pub product_variant_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

impl LineItemInput {
    pub fn new(product_variant_id: Uuid, quantity: i32, unit_cost: Decimal) -> Self {
        Self {
            product_variant_id,
            quantity,
            unit_cost,
        }
    }
}

/// Largest value a `NUMERIC(14, 2)` money column holds
pub fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

/// `quantity * unit_cost`, `None` when it overflows
pub fn checked_line_subtotal(quantity: i32, unit_cost: Decimal) -> Option<Decimal> {
    Decimal::from(quantity).checked_mul(unit_cost)
}

/// `quantity * unit_cost`, saturating; validated input never reaches the bound
pub fn line_subtotal(quantity: i32, unit_cost: Decimal) -> Decimal {
    checked_line_subtotal(quantity, unit_cost).unwrap_or(Decimal::MAX)
}

/// Sum of line subtotals, saturating like [`line_subtotal`]
pub fn purchase_subtotal(items: &[LineItemInput]) -> Decimal {
    items.iter().fold(Decimal::ZERO, |total, item| {
        total
            .checked_add(line_subtotal(item.quantity, item.unit_cost))
            .unwrap_or(Decimal::MAX)
    })
}

/// Collapse `(variant, quantity)` pairs into per-variant totals, sorted by variant id
///
/// Totals saturate at `i32::MAX`; `validate_line_items` rejects item lists
/// that would get there.
pub fn quantities_by_variant(pairs: impl IntoIterator<Item = (Uuid, i32)>) -> Vec<(Uuid, i32)> {
    let mut totals = std::collections::BTreeMap::new();
    for (variant_id, quantity) in pairs {
        let total = totals.entry(variant_id).or_insert(0i32);
        *total = total.saturating_add(quantity);
    }
    totals.into_iter().collect()
}
