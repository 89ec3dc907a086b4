//! Shared types and models for the stock reconciliation engine
//!
//! Purchases, line items, product variants and stock movements, together
//! with the pure rules (money and ledger arithmetic, validation) that every
//! surface of the engine relies on.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
