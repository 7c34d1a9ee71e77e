//! Risk Classifier
//! Maps the continuous 0-100 score onto an ordered, named risk band
//!
//! Default lending bands:
//! - 0-20: Very Low Risk
//! - 20-40: Low Risk
//! - 40-60: Medium Risk (gray area, manual review)
//! - 60-76: High Risk
//! - 76-100: Very High Risk

use serde::{Deserialize, Serialize};

use crate::models::config::RiskBandSpec;
use crate::models::errors::{AppError, AppResult};

const BAND_EPSILON: f64 = 1e-9;

/// Classified band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBand {
    pub label: String,
    /// 0 = lowest risk
    pub rank: usize,
}

/// Validated band table: contiguous, ascending, covering `[0, 100)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBandTable {
    bands: Vec<RiskBandSpec>,
}

impl RiskBandTable {
    pub fn new(bands: &[RiskBandSpec]) -> AppResult<Self> {
        let first = bands
            .first()
            .ok_or_else(|| AppError::invalid_config("risk_bands must not be empty"))?;
        if first.min.abs() > BAND_EPSILON {
            return Err(AppError::invalid_config("risk_bands must start at 0"));
        }

        for (i, band) in bands.iter().enumerate() {
            if band.label.trim().is_empty() {
                return Err(AppError::invalid_config(format!("risk band #{} has no label", i)));
            }
            if !(band.min.is_finite() && band.max.is_finite()) || band.min >= band.max {
                return Err(AppError::invalid_config(format!(
                    "risk band '{}' must have min < max",
                    band.label
                )));
            }
            if let Some(next) = bands.get(i + 1) {
                if next.min > band.max + BAND_EPSILON {
                    return Err(AppError::invalid_config(format!(
                        "gap between '{}' and '{}'",
                        band.label, next.label
                    )));
                }
                if next.min < band.max - BAND_EPSILON {
                    return Err(AppError::invalid_config(format!(
                        "'{}' overlaps '{}' or bands are not ascending",
                        band.label, next.label
                    )));
                }
            }
        }

        let last = &bands[bands.len() - 1];
        if (last.max - 100.0).abs() > BAND_EPSILON {
            return Err(AppError::invalid_config("risk_bands must end at 100"));
        }

        Ok(Self { bands: bands.to_vec() })
    }

    pub fn bands(&self) -> &[RiskBandSpec] {
        &self.bands
    }
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    table: RiskBandTable,
}

impl RiskClassifier {
    pub fn new(table: RiskBandTable) -> Self {
        Self { table }
    }

    pub fn from_specs(bands: &[RiskBandSpec]) -> AppResult<Self> {
        Ok(Self::new(RiskBandTable::new(bands)?))
    }

    /// Band with the largest `min <= score`. NaN and scores below the first
    /// threshold land in the lowest band; 100 and above in the last.
    pub fn classify(&self, score: f64) -> RiskBand {
        let bands = self.table.bands();
        let rank = if score.is_nan() {
            0
        } else {
            bands.iter().rposition(|b| b.min <= score).unwrap_or(0)
        };
        RiskBand {
            label: bands[rank].label.clone(),
            rank,
        }
    }

    pub fn band_count(&self) -> usize {
        self.table.bands().len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.table.bands().iter().map(|b| b.label.clone()).collect()
    }
}
