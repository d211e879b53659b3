//! Infrastructure layer: ledger stores, stock views, the movement recorder,
//! configuration and background refresh.

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod history;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod projections;
pub mod read_model;
pub mod recorder;
pub mod retry;
pub mod workers;

pub use aggregator::{
    AggregatorError, ConsistencyReport, StalenessPolicy, StockAggregator, StockLevel, StockMismatch,
};
pub use catalog::{Catalog, CatalogError, CatalogPage, InMemoryCatalog};
pub use config::InventoryConfig;
pub use history::{HistoryEntry, HistoryPage, MovementHistory};
pub use ledger::{
    InMemoryLedgerStore, LedgerFilter, LedgerOrdering, LedgerPage, LedgerStore, LedgerStoreError, Pagination,
    PostgresLedgerStore,
};
pub use monitor::LowStockMonitor;
pub use recorder::{ErrorCategory, MovementRecorder, MovementRequest, RecordError, RecordOutcome};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use workers::{RefreshWorker, WorkerHandle};

#[cfg(test)]
mod integration_tests;
