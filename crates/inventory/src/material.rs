use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, Entity, MaterialId, ValueObject};

/// Inclusive reorder band for a material.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    min_quantity: i64,
    max_quantity: i64,
}

impl StockThresholds {
    pub fn new(min_quantity: i64, max_quantity: i64) -> DomainResult<Self> {
        if min_quantity < 0 || max_quantity < 0 {
            return Err(DomainError::validation("thresholds cannot be negative"));
        }
        if min_quantity > max_quantity {
            return Err(DomainError::validation(format!(
                "min_quantity ({min_quantity}) cannot exceed max_quantity ({max_quantity})"
            )));
        }
        Ok(Self {
            min_quantity,
            max_quantity,
        })
    }

    pub fn min_quantity(&self) -> i64 {
        self.min_quantity
    }

    pub fn max_quantity(&self) -> i64 {
        self.max_quantity
    }
}

impl ValueObject for StockThresholds {}

const MAX_BARCODE_LEN: usize = 64;

/// A scannable code. Unique across the whole catalog (primary and additional).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(String);

impl Barcode {
    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let code = raw.as_ref().trim();
        if code.is_empty() {
            return Err(DomainError::validation("barcode cannot be empty"));
        }
        if code.len() > MAX_BARCODE_LEN {
            return Err(DomainError::validation(format!(
                "barcode longer than {MAX_BARCODE_LEN} characters"
            )));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("barcode cannot contain whitespace"));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Barcode {}

impl core::fmt::Display for Barcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog input for a new material.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewMaterial {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub unit: String,
    pub min_quantity: i64,
    pub max_quantity: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub primary_barcode: Option<String>,
    #[serde(default)]
    pub additional_barcodes: Vec<String>,
}

/// Catalog entity: something that can be stocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub description: Option<String>,
    pub unit: String,
    pub thresholds: StockThresholds,
    pub image_url: Option<String>,
    pub primary_barcode: Option<Barcode>,
    pub additional_barcodes: Vec<Barcode>,
}

impl Material {
    /// Validate catalog input into a material.
    ///
    /// Global barcode uniqueness is the catalog's job; this only rejects a
    /// material that repeats one of its own codes.
    pub fn create(id: MaterialId, input: NewMaterial) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let unit = input.unit.trim();
        if unit.is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }

        let thresholds = StockThresholds::new(input.min_quantity, input.max_quantity)?;

        let primary_barcode = match input.primary_barcode.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(code) => Some(Barcode::new(code)?),
        };
        let additional_barcodes = input
            .additional_barcodes
            .iter()
            .map(Barcode::new)
            .collect::<DomainResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for code in primary_barcode.iter().chain(additional_barcodes.iter()) {
            if !seen.insert(code) {
                return Err(DomainError::validation(format!("barcode '{code}' listed twice")));
            }
        }

        Ok(Self {
            id,
            name: name.to_string(),
            description: non_blank(input.description),
            unit: unit.to_string(),
            thresholds,
            image_url: non_blank(input.image_url),
            primary_barcode,
            additional_barcodes,
        })
    }

    /// Every code that identifies this material, primary first.
    pub fn barcodes(&self) -> impl Iterator<Item = &Barcode> {
        self.primary_barcode.iter().chain(self.additional_barcodes.iter())
    }
}

impl Entity for Material {
    type Id = MaterialId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
