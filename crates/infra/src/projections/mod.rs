//! Read models folded from the movement ledger.
//!
//! Projections here are:
//! - **Rebuildable**: clearing and replaying the ledger reproduces them
//! - **Idempotent**: a record seen twice is applied once
//! - **Gap-aware**: a stream that skips a sequence number is refused, so the
//!   caller re-reads the ledger instead of folding a partial history

pub mod stock_levels;

pub use stock_levels::{Applied, StockLevelsProjection, StockProjectionError, StockSnapshot};
