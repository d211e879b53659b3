//! Low-stock alerts derived from the aggregator snapshot.

use std::sync::{Arc, Mutex};

use stockroom_inventory::StockKey;

use crate::aggregator::{AggregatorError, StockAggregator, StockLevel};
use crate::catalog::Catalog;
use crate::ledger::LedgerStore;
use crate::projections::StockSnapshot;
use crate::read_model::{InMemoryReadModelStore, ReadModelStore};

/// Keys below their material's `min_quantity`.
///
/// Recomputed only when the snapshot generation moves; between changes the
/// previous answer is served.
pub struct LowStockMonitor<L, C, S = InMemoryReadModelStore<StockKey, StockSnapshot>>
where
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    aggregator: Arc<StockAggregator<L, C, S>>,
    cached: Mutex<Option<(u64, Vec<StockLevel>)>>,
}

impl<L, C, S> LowStockMonitor<L, C, S>
where
    L: LedgerStore,
    C: Catalog,
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    pub fn new(aggregator: Arc<StockAggregator<L, C, S>>) -> Self {
        Self {
            aggregator,
            cached: Mutex::new(None),
        }
    }

    /// Ordered by status, then material and location name. Every row is
    /// below `min_quantity`, so all of them classify as `Critical` under the
    /// min/max rule.
    pub fn low_stock(&self) -> Result<Vec<StockLevel>, AggregatorError> {
        self.aggregator.refresh_if_stale()?;
        let generation = self.aggregator.generation();

        if let Ok(cached) = self.cached.lock() {
            if let Some((seen, rows)) = cached.as_ref() {
                if *seen == generation {
                    return Ok(rows.clone());
                }
            }
        }

        let mut rows: Vec<StockLevel> = self
            .aggregator
            .all_stock()?
            .into_iter()
            .filter(|row| row.current_stock < row.min_quantity)
            .collect();
        rows.sort_by(|a, b| {
            a.status
                .cmp(&b.status)
                .then_with(|| a.material_name.cmp(&b.material_name))
                .then_with(|| a.location_name.cmp(&b.location_name))
        });

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((generation, rows.clone()));
        }
        Ok(rows)
    }
}
