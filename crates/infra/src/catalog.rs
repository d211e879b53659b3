//! Materials and locations referenced by the ledger.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use stockroom_core::{DomainError, LocationId, MaterialId};
use stockroom_inventory::{Barcode, Location, Material, NewLocation, NewMaterial, StockThresholds};

use crate::ledger::{LedgerStore, LedgerStoreError, Pagination};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("barcode '{0}' is already assigned to another material")]
    DuplicateBarcode(Barcode),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is referenced by ledger entries")]
    InUse(String),

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),
}

/// Read side of the catalog, as the ledger components need it.
pub trait Catalog: Send + Sync {
    fn material(&self, id: MaterialId) -> Option<Material>;

    fn location(&self, id: LocationId) -> Option<Location>;

    fn material_exists(&self, id: MaterialId) -> bool {
        self.material(id).is_some()
    }

    fn location_exists(&self, id: LocationId) -> bool {
        self.location(id).is_some()
    }

    /// Reorder band and unit of measure.
    fn thresholds(&self, id: MaterialId) -> Option<(StockThresholds, String)> {
        self.material(id).map(|m| (m.thresholds, m.unit))
    }
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn material(&self, id: MaterialId) -> Option<Material> {
        (**self).material(id)
    }

    fn location(&self, id: LocationId) -> Option<Location> {
        (**self).location(id)
    }

    fn material_exists(&self, id: MaterialId) -> bool {
        (**self).material_exists(id)
    }

    fn location_exists(&self, id: LocationId) -> bool {
        (**self).location_exists(id)
    }

    fn thresholds(&self, id: MaterialId) -> Option<(StockThresholds, String)> {
        (**self).thresholds(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub pagination: Pagination,
}

#[derive(Debug, Default)]
struct CatalogState {
    materials: HashMap<MaterialId, Material>,
    locations: HashMap<LocationId, Location>,
    /// Every primary and additional code, across all materials.
    barcodes: HashMap<Barcode, MaterialId>,
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_material(&self, input: NewMaterial) -> Result<Material, CatalogError> {
        let material = Material::create(MaterialId::new(), input)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(taken) = material.barcodes().find(|c| state.barcodes.contains_key(*c)) {
            return Err(CatalogError::DuplicateBarcode(taken.clone()));
        }
        for code in material.barcodes() {
            state.barcodes.insert(code.clone(), material.id);
        }
        state.materials.insert(material.id, material.clone());

        info!(material_id = %material.id, name = %material.name, "material created");
        Ok(material)
    }

    pub fn create_location(&self, input: NewLocation) -> Result<Location, CatalogError> {
        let location = Location::create(LocationId::new(), input)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.locations.insert(location.id, location.clone());

        info!(location_id = %location.id, name = %location.name, "location created");
        Ok(location)
    }

    /// Ordered by name.
    pub fn list_materials(&self, pagination: Pagination) -> CatalogPage<Material> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Material> = state.materials.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.as_uuid().cmp(b.id.as_uuid())));
        CatalogPage {
            items: pagination.apply(&all),
            total: all.len() as u64,
            pagination,
        }
    }

    /// Ordered by name.
    pub fn list_locations(&self, pagination: Pagination) -> CatalogPage<Location> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Location> = state.locations.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.as_uuid().cmp(b.id.as_uuid())));
        CatalogPage {
            items: pagination.apply(&all),
            total: all.len() as u64,
            pagination,
        }
    }

    /// Match against primary and additional codes.
    pub fn find_by_barcode(&self, raw: &str) -> Result<Material, CatalogError> {
        let code = Barcode::new(raw)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .barcodes
            .get(&code)
            .and_then(|id| state.materials.get(id))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("material with barcode '{code}'")))
    }

    /// Refused while any ledger entry references the material.
    pub fn remove_material<L>(&self, id: MaterialId, ledger: &L) -> Result<Material, CatalogError>
    where
        L: LedgerStore + ?Sized,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.materials.contains_key(&id) {
            return Err(CatalogError::NotFound(format!("material {id}")));
        }
        if ledger.references_material(id)? {
            return Err(CatalogError::InUse(format!("material {id}")));
        }

        let removed = state
            .materials
            .remove(&id)
            .ok_or_else(|| CatalogError::NotFound(format!("material {id}")))?;
        state.barcodes.retain(|_, owner| *owner != id);

        info!(material_id = %id, "material removed");
        Ok(removed)
    }

    /// Refused while any ledger entry references the location.
    pub fn remove_location<L>(&self, id: LocationId, ledger: &L) -> Result<Location, CatalogError>
    where
        L: LedgerStore + ?Sized,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.locations.contains_key(&id) {
            return Err(CatalogError::NotFound(format!("location {id}")));
        }
        if ledger.references_location(id)? {
            return Err(CatalogError::InUse(format!("location {id}")));
        }

        let removed = state
            .locations
            .remove(&id)
            .ok_or_else(|| CatalogError::NotFound(format!("location {id}")))?;

        info!(location_id = %id, "location removed");
        Ok(removed)
    }
}

impl Catalog for InMemoryCatalog {
    fn material(&self, id: MaterialId) -> Option<Material> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.materials.get(&id).cloned()
    }

    fn location(&self, id: LocationId) -> Option<Location> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.locations.get(&id).cloned()
    }
}
