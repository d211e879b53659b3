//! Inventory domain module (ledger-backed).
//!
//! Business rules for materials, locations and stock movements, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).
//!
//! Stock is never stored: it is the signed sum of a (material, location)
//! ledger stream, folded by [`StockPosition`] when deciding and by
//! [`StockTotals`] when replaying.

pub mod location;
pub mod material;
pub mod movement;
pub mod position;
pub mod status;
pub mod totals;

pub use location::{Location, NewLocation};
pub use material::{Barcode, Material, NewMaterial, StockThresholds};
pub use movement::{MovementKind, MovementRecord, MovementRecorded, STOCK_STREAM_TYPE};
pub use position::{MovementError, RecordMovement, StockKey, StockPosition, adjustment_reason};
pub use status::{StatusBands, StockStatus, classify};
pub use totals::StockTotals;
