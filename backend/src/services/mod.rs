//! Business logic services for the stock reconciliation engine

pub mod journal;
pub mod notification;
pub mod reconciliation;
pub mod returns;
pub mod stock_ledger;

pub use journal::MutationJournal;
pub use notification::{LogNotifier, NotificationLevel, NotificationSink, RecordingNotifier};
pub use reconciliation::{
    plan_reconciliation, CreatePurchaseInput, DeletePurchaseInput, PurchaseService,
    ReconciliationPlan, UpdatePurchaseInput,
};
pub use returns::{CreateReturnInput, ReturnHandler};
pub use stock_ledger::{AdjustStockInput, CreateVariantInput, StockLedger};
