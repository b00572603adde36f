//! Scoring engine
//!
//! Normalizes aggregated features against the table's denominators, combines
//! them with the table's weights and bias, and maps the sum to a score. The
//! engine is generic over whatever features the table declares; it knows
//! nothing about individual feature names.

use crate::calibration::{CalibrationTable, ScoreMode};
use crate::error::ScanError;
use crate::types::{FeatureMap, ScoreResult};

/// Logistic transform `1 / (1 + e^-x)`
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Divide by the denominator and clamp to [0, 1]
pub fn normalize(raw: f64, denominator: f64) -> f64 {
    if !raw.is_finite() || denominator <= 0.0 {
        return 0.0;
    }
    (raw / denominator).clamp(0.0, 1.0)
}

pub struct ScoringEngine;

impl ScoringEngine {
    /// Score a set of aggregated features.
    ///
    /// Every feature the table declares must be present in `aggregates`;
    /// extra entries are ignored.
    pub fn score(aggregates: &FeatureMap, table: &CalibrationTable) -> Result<ScoreResult, ScanError> {
        let mut normalized = FeatureMap::new();
        let mut raw = FeatureMap::new();
        let mut sum = table.bias();

        for (feature, cal) in table.iter() {
            let value = *aggregates
                .get(&feature)
                .ok_or_else(|| ScanError::MissingFeature(feature.to_string()))?;
            let n = normalize(value, cal.denominator);
            sum += cal.weight * n;
            normalized.insert(feature, n);
            raw.insert(feature, value);
        }

        let probability = match table.mode() {
            ScoreMode::Logistic => logistic(sum),
            ScoreMode::Linear => sum.clamp(0.0, 1.0),
        };

        Ok(ScoreResult {
            use_case: table.name().to_string(),
            mode: table.mode(),
            score: probability * 100.0,
            probability,
            normalized,
            raw,
            summary: None,
        })
    }
}
