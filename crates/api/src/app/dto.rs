use serde::{Deserialize, Serialize};

use stockroom_core::{LocationId, MaterialId};
use stockroom_infra::{LedgerFilter, Pagination, StockLevel};
use stockroom_inventory::MovementKind;

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct StockQuery {
    /// Read-your-writes: wait for the view to reach this ledger position.
    pub min_position: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// 1-based.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub material_id: Option<MaterialId>,
    pub location_id: Option<LocationId>,
    pub entry_type: Option<MovementKind>,
}

impl HistoryQuery {
    pub fn filter(&self) -> LedgerFilter {
        LedgerFilter {
            material_id: self.material_id,
            location_id: self.location_id,
            kind: self.entry_type,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StockListResponse {
    /// Ledger position the rows reflect.
    pub position: u64,
    pub items: Vec<StockLevel>,
}

#[derive(Debug, Serialize)]
pub struct CurrentStockResponse {
    pub material_id: MaterialId,
    pub location_id: LocationId,
    pub current_stock: i64,
    pub position: u64,
}
