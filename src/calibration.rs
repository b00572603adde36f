//! Calibration tables
//!
//! A calibration table declares the feature set of one use case together with
//! the weight, normalization denominator and robust-aggregation fraction of
//! every feature. Tables are validated once on construction and then shared
//! read-only (typically behind an `Arc`) across sessions.

use crate::error::ScanError;
use crate::types::{Feature, FeatureSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default fraction of the lowest per-tick values kept by the aggregator
pub const DEFAULT_AGGREGATION_FRACTION: f64 = 0.25;

/// How the weighted sum becomes a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// `1 / (1 + e^-x)`, reported as a probability
    Logistic,
    /// The weighted value itself, clamped to [0, 1]
    Linear,
}

/// Per-feature calibration constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureCalibration {
    pub weight: f64,
    /// Raw value mapped to 1.0 by normalization
    pub denominator: f64,
    /// Fraction of the lowest per-tick values averaged by the aggregator
    #[serde(default = "default_fraction")]
    pub fraction: f64,
}

fn default_fraction() -> f64 {
    DEFAULT_AGGREGATION_FRACTION
}

impl FeatureCalibration {
    pub fn new(weight: f64, denominator: f64) -> Self {
        Self {
            weight,
            denominator,
            fraction: DEFAULT_AGGREGATION_FRACTION,
        }
    }
}

/// Immutable calibration for one use case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    name: String,
    mode: ScoreMode,
    bias: f64,
    features: BTreeMap<Feature, FeatureCalibration>,
}

impl CalibrationTable {
    /// Build and validate a table
    pub fn new(
        name: impl Into<String>,
        mode: ScoreMode,
        bias: f64,
        features: impl IntoIterator<Item = (Feature, FeatureCalibration)>,
    ) -> Result<Self, ScanError> {
        let table = Self {
            name: name.into(),
            mode,
            bias,
            features: features.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// Load a table from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a built-in preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "deception" => Some(Self::deception()),
            "trait_likelihood" => Some(Self::trait_likelihood()),
            "appearance" => Some(Self::appearance()),
            _ => None,
        }
    }

    /// Names accepted by [`CalibrationTable::preset`]
    pub const PRESETS: [&'static str; 3] = ["deception", "trait_likelihood", "appearance"];

    /// Deception-likelihood scan: voice energy, head/eye motion, lip tension
    /// and disfluency.
    pub fn deception() -> Self {
        Self {
            name: "deception".to_string(),
            mode: ScoreMode::Logistic,
            bias: -2.0,
            features: BTreeMap::from([
                (Feature::Rms, FeatureCalibration::new(1.2, 0.2)),
                (Feature::Zcr, FeatureCalibration::new(0.8, 0.3)),
                (Feature::HeadMovement, FeatureCalibration::new(1.5, 0.02)),
                (Feature::EyeMovement, FeatureCalibration::new(1.5, 0.015)),
                (Feature::LipTension, FeatureCalibration::new(1.0, 1.0)),
                (Feature::FillerRate, FeatureCalibration::new(1.2, 0.15)),
                (Feature::PauseDuration, FeatureCalibration::new(0.8, 3.0)),
            ]),
        }
    }

    /// Trait-likelihood scan: facial expression geometry plus voice energy
    pub fn trait_likelihood() -> Self {
        Self {
            name: "trait_likelihood".to_string(),
            mode: ScoreMode::Logistic,
            bias: -1.5,
            features: BTreeMap::from([
                (Feature::EyeAspectRatio, FeatureCalibration::new(1.0, 0.4)),
                (Feature::MouthAperture, FeatureCalibration::new(1.2, 0.15)),
                (Feature::BrowRaise, FeatureCalibration::new(0.8, 0.2)),
                (Feature::HeadTilt, FeatureCalibration::new(0.6, 0.35)),
                (Feature::HeadMovement, FeatureCalibration::new(0.9, 0.02)),
                (Feature::Rms, FeatureCalibration::new(0.7, 0.2)),
            ]),
        }
    }

    /// Appearance scan: static facial proportions, reported linearly
    pub fn appearance() -> Self {
        Self {
            name: "appearance".to_string(),
            mode: ScoreMode::Linear,
            bias: 0.4,
            features: BTreeMap::from([
                (Feature::FaceAsymmetry, FeatureCalibration::new(-0.4, 0.2)),
                (Feature::FaceProportion, FeatureCalibration::new(0.5, 1.618)),
                (Feature::EyeSpacing, FeatureCalibration::new(0.5, 0.5)),
            ]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ScoreMode {
        self.mode
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn get(&self, feature: Feature) -> Option<&FeatureCalibration> {
        self.features.get(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, &FeatureCalibration)> {
        self.features.iter().map(|(f, c)| (*f, c))
    }

    /// Every declared feature
    pub fn features(&self) -> Vec<Feature> {
        self.features.keys().copied().collect()
    }

    /// Declared features produced by the sampling loop on every tick
    pub fn tick_features(&self) -> Vec<Feature> {
        self.features
            .keys()
            .copied()
            .filter(Feature::is_per_tick)
            .collect()
    }

    /// Whether any declared feature comes from the transcript stream
    pub fn uses_speech(&self) -> bool {
        self.features
            .keys()
            .any(|f| f.source() == FeatureSource::Speech)
    }

    /// Whether any declared feature needs the audio buffer
    pub fn uses_audio(&self) -> bool {
        self.features
            .keys()
            .any(|f| f.source() == FeatureSource::Audio)
    }

    fn validate(&self) -> Result<(), ScanError> {
        if self.name.trim().is_empty() {
            return Err(ScanError::InvalidCalibration(
                "table name must not be empty".to_string(),
            ));
        }
        if self.features.is_empty() {
            return Err(ScanError::InvalidCalibration(format!(
                "table '{}' declares no features",
                self.name
            )));
        }
        if !self.bias.is_finite() {
            return Err(ScanError::InvalidCalibration(format!(
                "table '{}' has a non-finite bias",
                self.name
            )));
        }

        for (feature, cal) in &self.features {
            if !cal.weight.is_finite() {
                return Err(ScanError::InvalidCalibration(format!(
                    "{feature}: weight must be finite"
                )));
            }
            if !cal.denominator.is_finite() || cal.denominator <= 0.0 {
                return Err(ScanError::InvalidCalibration(format!(
                    "{feature}: denominator must be positive, got {}",
                    cal.denominator
                )));
            }
            if !(cal.fraction > 0.0 && cal.fraction <= 1.0) {
                return Err(ScanError::InvalidCalibration(format!(
                    "{feature}: fraction must be in (0, 1], got {}",
                    cal.fraction
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for name in CalibrationTable::PRESETS {
            let table = CalibrationTable::preset(name).unwrap();
            assert_eq!(table.name(), name);
            assert!(table.validate().is_ok(), "preset {name} failed validation");
        }
        assert!(CalibrationTable::preset("horoscope").is_none());
    }

    #[test]
    fn test_deception_feature_split() {
        let table = CalibrationTable::deception();
        assert_eq!(
            table.tick_features(),
            vec![
                Feature::Rms,
                Feature::Zcr,
                Feature::HeadMovement,
                Feature::EyeMovement,
                Feature::LipTension,
            ]
        );
        assert!(table.uses_speech());
        assert!(table.uses_audio());
    }

    #[test]
    fn test_appearance_is_linear_and_silent() {
        let table = CalibrationTable::appearance();
        assert_eq!(table.mode(), ScoreMode::Linear);
        assert!(!table.uses_audio());
        assert!(!table.uses_speech());
    }

    #[test]
    fn test_from_json_defaults_fraction() {
        let json = r#"{
            "name": "custom",
            "mode": "logistic",
            "bias": -1.0,
            "features": {
                "rms": { "weight": 2.0, "denominator": 0.5 },
                "headMovement": { "weight": 1.0, "denominator": 0.1, "fraction": 0.5 }
            }
        }"#;

        let table = CalibrationTable::from_json(json).unwrap();
        assert_eq!(table.get(Feature::Rms).unwrap().fraction, 0.25);
        assert_eq!(table.get(Feature::HeadMovement).unwrap().fraction, 0.5);
        assert_eq!(table.bias(), -1.0);
    }

    #[test]
    fn test_rejects_zero_denominator() {
        let result = CalibrationTable::new(
            "bad",
            ScoreMode::Logistic,
            0.0,
            [(Feature::Rms, FeatureCalibration::new(1.0, 0.0))],
        );
        assert!(matches!(result, Err(ScanError::InvalidCalibration(_))));
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let mut cal = FeatureCalibration::new(1.0, 1.0);
        cal.fraction = 0.0;
        assert!(CalibrationTable::new("bad", ScoreMode::Linear, 0.0, [(Feature::Zcr, cal)]).is_err());
    }

    #[test]
    fn test_rejects_empty_table() {
        let result = CalibrationTable::new(
            "empty",
            ScoreMode::Linear,
            0.0,
            Vec::<(Feature, FeatureCalibration)>::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_feature_name() {
        let json = r#"{"name":"x","mode":"linear","bias":0.0,
            "features":{"auraColor":{"weight":1.0,"denominator":1.0}}}"#;
        assert!(matches!(
            CalibrationTable::from_json(json),
            Err(ScanError::JsonError(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let table = CalibrationTable::trait_likelihood();
        let json = table.to_json().unwrap();
        assert_eq!(CalibrationTable::from_json(&json).unwrap(), table);
    }
}
