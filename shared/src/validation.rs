//! Validation rules for purchases, line items and returns

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{checked_line_subtotal, max_amount, quantities_by_variant, LineItemInput, Purchase};

// ============================================================================
// Line Item Validations
// ============================================================================

/// Validate a line item quantity
pub fn validate_quantity(quantity: i32) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a line item unit cost
pub fn validate_unit_cost(unit_cost: Decimal) -> Result<(), &'static str> {
    if unit_cost < Decimal::ZERO {
        return Err("Unit cost cannot be negative");
    }
    if unit_cost > max_amount() {
        return Err("Unit cost is too large");
    }
    Ok(())
}

/// A line item rule violation, with the offending field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItemViolation {
    pub field: String,
    pub message: &'static str,
}

/// Validate a full item list
///
/// Non-empty, every quantity positive, every cost non-negative, and all
/// amounts and per-variant quantity totals within the storable range.
pub fn validate_line_items(items: &[LineItemInput]) -> Result<(), LineItemViolation> {
    if items.is_empty() {
        return Err(LineItemViolation {
            field: "items".to_string(),
            message: "At least one line item is required",
        });
    }

    let mut total = Decimal::ZERO;
    let mut per_variant: BTreeMap<Uuid, i64> = BTreeMap::new();
    for (index, item) in items.iter().enumerate() {
        if item.product_variant_id.is_nil() {
            return Err(LineItemViolation {
                field: format!("items[{}].product_variant_id", index),
                message: "Product variant is required",
            });
        }
        validate_quantity(item.quantity).map_err(|message| LineItemViolation {
            field: format!("items[{}].quantity", index),
            message,
        })?;
        validate_unit_cost(item.unit_cost).map_err(|message| LineItemViolation {
            field: format!("items[{}].unit_cost", index),
            message,
        })?;

        total = checked_line_subtotal(item.quantity, item.unit_cost)
            .and_then(|line| total.checked_add(line))
            .filter(|sum| *sum <= max_amount())
            .ok_or_else(|| LineItemViolation {
                field: format!("items[{}].unit_cost", index),
                message: "Purchase total is too large",
            })?;

        let quantity = per_variant.entry(item.product_variant_id).or_insert(0);
        *quantity += i64::from(item.quantity);
        if *quantity > i64::from(i32::MAX) {
            return Err(LineItemViolation {
                field: format!("items[{}].quantity", index),
                message: "Total quantity for one variant is too large",
            });
        }
    }
    Ok(())
}

/// Validate a supplier reference
pub fn validate_supplier(supplier_id: Uuid) -> Result<(), &'static str> {
    if supplier_id.is_nil() {
        return Err("Supplier is required");
    }
    Ok(())
}

// ============================================================================
// Return Validations
// ============================================================================

/// Why a requested return exceeds what may still be returned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReturnLimitError {
    #[error("variant {0} was not part of the original purchase")]
    NotInOriginal(Uuid),
    #[error("variant {variant_id}: requested {requested}, only {remaining} left to return")]
    ExceedsRemaining {
        variant_id: Uuid,
        requested: i32,
        remaining: i32,
    },
}

/// Quantity per variant still returnable: original minus every prior return
pub fn returnable_quantities(original: &Purchase, prior_returns: &[Purchase]) -> BTreeMap<Uuid, i32> {
    let mut remaining: BTreeMap<Uuid, i32> = original.quantities_by_variant().into_iter().collect();
    for prior in prior_returns {
        for (variant_id, quantity) in prior.quantities_by_variant() {
            if let Some(left) = remaining.get_mut(&variant_id) {
                *left = left.saturating_sub(quantity);
            }
        }
    }
    remaining
}

/// Check a requested return against the remaining returnable quantities
pub fn validate_return_limits(
    remaining: &BTreeMap<Uuid, i32>,
    requested: &[LineItemInput],
) -> Result<(), ReturnLimitError> {
    let requested = quantities_by_variant(
        requested
            .iter()
            .map(|item| (item.product_variant_id, item.quantity)),
    );
    for (variant_id, quantity) in requested {
        let left = *remaining
            .get(&variant_id)
            .ok_or(ReturnLimitError::NotInOriginal(variant_id))?;
        if quantity > left {
            return Err(ReturnLimitError::ExceedsRemaining {
                variant_id,
                requested: quantity,
                remaining: left.max(0),
            });
        }
    }
    Ok(())
}
