//! Stock ledger and variant projection models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A color/size combination of a product, the unit stock is tracked against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub color: String,
    pub size: String,
    pub sku: Option<String>,
    /// Cached projection of the ledger, never below zero
    pub on_hand_quantity: i32,
    /// Compare-and-set token for projection writes
    pub version: i64,
    pub is_active: bool,
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
        }
    }
}

impl std::str::FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementType::In),
            "out" => Ok(MovementType::Out),
            "adjustment" => Ok(MovementType::Adjustment),
            other => Err(format!("unknown movement type: {}", other)),
        }
    }
}

/// Direction of a movement; carries the sign of adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// What caused a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Purchase,
    Adjustment,
    Sale,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Purchase => "purchase",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::Sale => "sale",
        }
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(ReferenceType::Purchase),
            "adjustment" => Ok(ReferenceType::Adjustment),
            "sale" => Ok(ReferenceType::Sale),
            other => Err(format!("unknown reference type: {}", other)),
        }
    }
}

/// An immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_variant_id: Uuid,
    pub movement_type: MovementType,
    pub direction: Direction,
    /// Always a positive magnitude
    pub quantity: i32,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A movement about to be appended to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct NewStockMovement {
    pub product_variant_id: Uuid,
    pub movement_type: MovementType,
    pub direction: Direction,
    pub quantity: i32,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl NewStockMovement {
    /// Stock arriving because a purchase was received
    pub fn purchase_in(variant_id: Uuid, quantity: i32, purchase_id: Uuid, notes: Option<String>) -> Self {
        Self {
            product_variant_id: variant_id,
            movement_type: MovementType::In,
            direction: Direction::In,
            quantity,
            reference_type: ReferenceType::Purchase,
            reference_id: Some(purchase_id),
            notes,
        }
    }

    /// Stock leaving because a purchase was reversed or returned
    pub fn purchase_out(variant_id: Uuid, quantity: i32, purchase_id: Uuid, notes: Option<String>) -> Self {
        Self {
            product_variant_id: variant_id,
            movement_type: MovementType::Out,
            direction: Direction::Out,
            quantity,
            reference_type: ReferenceType::Purchase,
            reference_id: Some(purchase_id),
            notes,
        }
    }

    /// Manual stock adjustment; the sign of `change` picks the direction
    pub fn adjustment(variant_id: Uuid, change: i32, notes: Option<String>) -> Self {
        let direction = if change >= 0 { Direction::In } else { Direction::Out };
        Self {
            product_variant_id: variant_id,
            movement_type: MovementType::Adjustment,
            direction,
            quantity: change.saturating_abs(),
            reference_type: ReferenceType::Adjustment,
            reference_id: None,
            notes,
        }
    }

    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            Direction::In => i64::from(self.quantity),
            Direction::Out => -i64::from(self.quantity),
        }
    }

    pub fn into_movement(self, id: Uuid, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product_variant_id: self.product_variant_id,
            movement_type: self.movement_type,
            direction: self.direction,
            quantity: self.quantity,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            notes: self.notes,
            created_at,
        }
    }
}

/// Totals recomputed from the ledger for one variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub total_in: i64,
    pub total_out: i64,
    pub adjustment_in: i64,
    pub adjustment_out: i64,
}

impl LedgerTotals {
    pub fn from_movements<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        let mut totals = Self::default();
        for movement in movements {
            let qty = i64::from(movement.quantity);
            match (movement.movement_type, movement.direction) {
                (MovementType::Adjustment, Direction::In) => totals.adjustment_in += qty,
                (MovementType::Adjustment, Direction::Out) => totals.adjustment_out += qty,
                (_, Direction::In) => totals.total_in += qty,
                (_, Direction::Out) => totals.total_out += qty,
            }
        }
        totals
    }

    /// `in + adjustment(+) - out - adjustment(-)`; may be negative
    pub fn balance(&self) -> i64 {
        self.total_in + self.adjustment_in - self.total_out - self.adjustment_out
    }
}

/// Comparison of the cached projection against the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAudit {
    pub product_variant_id: Uuid,
    pub on_hand_quantity: i32,
    pub ledger_balance: i64,
    /// `on_hand_quantity - ledger_balance`; positive when the clamp absorbed a deficit
    pub discrepancy: i64,
    pub totals: LedgerTotals,
}

impl StockAudit {
    pub fn new(variant: &ProductVariant, movements: &[StockMovement]) -> Self {
        let totals = LedgerTotals::from_movements(movements);
        let ledger_balance = totals.balance();
        Self {
            product_variant_id: variant.id,
            on_hand_quantity: variant.on_hand_quantity,
            ledger_balance,
            discrepancy: i64::from(variant.on_hand_quantity) - ledger_balance,
            totals,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancy == 0
    }
}

/// Apply a signed delta to an on-hand counter, flooring at zero
pub fn apply_clamped(on_hand: i32, delta: i64) -> i32 {
    let next = i64::from(on_hand) + delta;
    next.clamp(0, i64::from(i32::MAX)) as i32
}
