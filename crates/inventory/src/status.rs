//! Display classification of a stock level against its material's band.

use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ValueObject};

use crate::material::StockThresholds;

/// Stock status, most severe first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Critical,
    VeryLow,
    Low,
    Normal,
    Optimal,
    Excess,
}

impl StockStatus {
    pub fn label(self) -> &'static str {
        match self {
            StockStatus::Critical => "Critical",
            StockStatus::VeryLow => "Very Low",
            StockStatus::Low => "Low",
            StockStatus::Normal => "Normal",
            StockStatus::Optimal => "Optimal",
            StockStatus::Excess => "Excess",
        }
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Ratio cut-offs (`current / max`) between min and max.
///
/// Below `very_low` is Very Low, below `low` is Low, below `normal` is
/// Normal, anything else up to max is Optimal.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBands {
    pub very_low: f64,
    pub low: f64,
    pub normal: f64,
}

impl StatusBands {
    pub fn new(very_low: f64, low: f64, normal: f64) -> DomainResult<Self> {
        let bands = Self {
            very_low,
            low,
            normal,
        };
        bands.validate()?;
        Ok(bands)
    }

    pub fn validate(&self) -> DomainResult<()> {
        let ordered = 0.0 < self.very_low && self.very_low < self.low && self.low < self.normal;
        if !ordered || self.normal > 1.0 {
            return Err(DomainError::validation(format!(
                "status bands must satisfy 0 < very_low < low < normal <= 1 (got {}, {}, {})",
                self.very_low, self.low, self.normal
            )));
        }
        Ok(())
    }
}

impl Default for StatusBands {
    fn default() -> Self {
        Self {
            very_low: 0.25,
            low: 0.5,
            normal: 0.75,
        }
    }
}

impl ValueObject for StatusBands {}

/// Classify `current` stock. The min/max checks win over the ratio bands.
pub fn classify(current: i64, thresholds: &StockThresholds, bands: &StatusBands) -> StockStatus {
    let (min, max) = (thresholds.min_quantity(), thresholds.max_quantity());
    if current <= min {
        return StockStatus::Critical;
    }
    if current >= max {
        return StockStatus::Excess;
    }

    // current > min >= 0 and current < max, so max > 0 here.
    let ratio = current as f64 / max as f64;
    if ratio < bands.very_low {
        StockStatus::VeryLow
    } else if ratio < bands.low {
        StockStatus::Low
    } else if ratio < bands.normal {
        StockStatus::Normal
    } else {
        StockStatus::Optimal
    }
}
