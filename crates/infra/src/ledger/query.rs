//! Ledger query parameters and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{LocationId, MaterialId};
use stockroom_inventory::{MovementKind, MovementRecord};

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Default page size (history view).
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    /// 0-based.
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// 1-based page number to a window. Page 0 is treated as page 1.
    pub fn page(page: u32, page_size: u32) -> Self {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        Self {
            limit,
            offset: page.max(1).saturating_sub(1).saturating_mul(limit),
        }
    }

    /// Slice an already ordered sequence.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Filter over committed entries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub material_id: Option<MaterialId>,
    pub location_id: Option<LocationId>,
    pub kind: Option<MovementKind>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn for_material(material_id: MaterialId) -> Self {
        Self {
            material_id: Some(material_id),
            ..Default::default()
        }
    }

    pub fn for_location(location_id: LocationId) -> Self {
        Self {
            location_id: Some(location_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &MovementRecord) -> bool {
        self.material_id.is_none_or(|m| m == record.material_id)
            && self.location_id.is_none_or(|l| l == record.location_id)
            && self.kind.is_none_or(|k| k == record.kind)
            && self.created_after.is_none_or(|t| record.created_at >= t)
            && self.created_before.is_none_or(|t| record.created_at <= t)
    }
}

/// Result order. Positions follow `created_at`, so either is a time order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOrdering {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub records: Vec<MovementRecord>,
    /// Matching entries across all pages.
    pub total: u64,
    pub pagination: Pagination,
}

impl LedgerPage {
    pub fn has_more(&self) -> bool {
        self.total > u64::from(self.pagination.offset) + self.records.len() as u64
    }
}
