//! Temporal smoothing for live feedback
//!
//! One exponential moving average per feature:
//! `smoothed = α·current + (1-α)·smoothed`. Channels start at 0 and are only
//! ever updated or reset. The smoothed values drive live display only; scoring
//! uses the raw per-tick history.

use crate::types::{Feature, FeatureMap, FeatureSnapshot};
use serde::{Deserialize, Serialize};

/// Current value of every smoothing channel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SmoothedState {
    values: FeatureMap,
}

impl SmoothedState {
    /// Smoothed value of a channel (0 for channels not yet updated)
    pub fn get(&self, feature: Feature) -> f64 {
        self.values.get(&feature).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    pub fn as_map(&self) -> &FeatureMap {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Exponential moving average filter bank
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    alpha: f64,
    state: SmoothedState,
}

impl TemporalSmoother {
    /// `alpha` is clamped to (0, 1]; configuration validation rejects values
    /// outside that range before they get here
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            state: SmoothedState::default(),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Fold one snapshot into the channels
    pub fn update(&mut self, snapshot: &FeatureSnapshot) -> &SmoothedState {
        for (feature, current) in snapshot.iter() {
            let channel = self.state.values.entry(feature).or_insert(0.0);
            *channel = self.alpha * current + (1.0 - self.alpha) * *channel;
        }
        &self.state
    }

    /// All channels back to 0
    pub fn reset(&mut self) {
        self.state = SmoothedState::default();
    }

    pub fn state(&self) -> &SmoothedState {
        &self.state
    }
}
