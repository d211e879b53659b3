//! Movement history view: the ledger newest first, joined with catalog names.

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockroom_core::{LocationId, MaterialId, MovementId, UserId};
use stockroom_inventory::{MovementKind, MovementRecord};

use crate::catalog::Catalog;
use crate::ledger::{DEFAULT_PAGE_SIZE, LedgerFilter, LedgerOrdering, LedgerStore, LedgerStoreError, Pagination};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: MovementId,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "entry_type")]
    pub kind: MovementKind,
    pub quantity: i64,
    pub material_id: MaterialId,
    pub material_name: String,
    pub unit: String,
    pub location_id: LocationId,
    pub location_name: String,
    pub worker_name: Option<String>,
    pub reason: Option<String>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

pub struct MovementHistory<L, C> {
    ledger: L,
    catalog: C,
    default_page_size: u32,
}

impl<L, C> MovementHistory<L, C>
where
    L: LedgerStore,
    C: Catalog,
{
    pub fn new(ledger: L, catalog: C) -> Self {
        Self::with_page_size(ledger, catalog, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(ledger: L, catalog: C, default_page_size: u32) -> Self {
        Self {
            ledger,
            catalog,
            default_page_size,
        }
    }

    /// `page` is 1-based; `page_size` falls back to the configured default.
    pub fn page(
        &self,
        page: u32,
        page_size: Option<u32>,
        filter: &LedgerFilter,
    ) -> Result<HistoryPage, LedgerStoreError> {
        let page = page.max(1);
        let pagination = Pagination::page(page, page_size.unwrap_or(self.default_page_size));
        let result = self.ledger.query(filter, LedgerOrdering::NewestFirst, pagination)?;

        let page_size = pagination.limit;
        Ok(HistoryPage {
            entries: result.records.iter().map(|r| self.entry(r)).collect(),
            page,
            page_size,
            total: result.total,
            total_pages: result.total.div_ceil(u64::from(page_size)),
        })
    }

    fn entry(&self, record: &MovementRecord) -> HistoryEntry {
        let (material_name, unit) = match self.catalog.material(record.material_id) {
            Some(m) => (m.name, m.unit),
            None => ("Unknown".to_string(), String::new()),
        };
        let location_name = self
            .catalog
            .location(record.location_id)
            .map(|l| l.name)
            .unwrap_or_else(|| "Unknown".to_string());

        HistoryEntry {
            id: record.id,
            created_at: record.created_at,
            kind: record.kind,
            quantity: record.quantity,
            material_id: record.material_id,
            material_name,
            unit,
            location_id: record.location_id,
            location_name,
            worker_name: record.worker_name.clone(),
            reason: record.reason.clone(),
            user_id: record.user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::InMemoryCatalog;
    use crate::ledger::InMemoryLedgerStore;
    use stockroom_core::ExpectedVersion;
    use stockroom_inventory::{MovementRecorded, NewLocation, NewMaterial};

    #[test]
    fn newest_first_with_catalog_names_and_fallbacks() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let paint = catalog
            .create_material(NewMaterial {
                name: "Paint".to_string(),
                unit: "l".to_string(),
                min_quantity: 0,
                max_quantity: 10,
                ..Default::default()
            })
            .unwrap();
        let store_room = catalog
            .create_location(NewLocation {
                name: "Store room".to_string(),
                description: None,
            })
            .unwrap();

        let append = |material_id, quantity| {
            ledger
                .append(
                    MovementRecorded {
                        movement_id: MovementId::new(),
                        material_id,
                        location_id: store_room.id,
                        kind: MovementKind::In,
                        quantity,
                        worker_name: None,
                        reason: None,
                        user_id: UserId::new(),
                        idempotency_key: None,
                    },
                    ExpectedVersion::Any,
                )
                .unwrap()
        };
        for q in 1..=4 {
            append(paint.id, q);
        }
        append(MaterialId::new(), 9);

        let history = MovementHistory::new(ledger.clone(), catalog.clone());
        let first = history.page(1, Some(2), &LedgerFilter::default()).unwrap();

        assert_eq!(first.total, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.entries[0].material_name, "Unknown");
        assert_eq!(first.entries[0].unit, "");
        assert_eq!(first.entries[1].quantity, 4);
        assert_eq!(first.entries[1].unit, "l");
        assert_eq!(first.entries[1].location_name, "Store room");

        let last = history.page(3, Some(2), &LedgerFilter::default()).unwrap();
        assert_eq!(last.entries.iter().map(|e| e.quantity).collect::<Vec<_>>(), vec![1]);

        let empty = history.page(9, None, &LedgerFilter::for_material(paint.id)).unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!((empty.page_size, empty.total, empty.total_pages), (50, 4, 1));
    }
}
