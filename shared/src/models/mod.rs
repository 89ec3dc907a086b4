//! Domain models for the stock reconciliation engine

mod purchase;
mod stock;

pub use purchase::*;
pub use stock::*;
