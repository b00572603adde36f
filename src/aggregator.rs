//! Session aggregation
//!
//! Reduces a session's per-tick history to one value per feature with a
//! lower-quantile trimmed mean: sort the readings ascending, keep the smallest
//! `ceil(n * fraction)` and average them. With the default fraction of 0.25
//! this is the mean of the lowest quartile, which drops the transient spikes
//! (blinks, mic pops, detection jitter) that dominate the upper readings.

use crate::calibration::CalibrationTable;
use crate::error::ScanError;
use crate::types::{FeatureHistory, FeatureMap};
use tracing::debug;

/// Float error tolerated in `len * fraction` before rounding up
const COUNT_EPSILON: f64 = 1e-9;

/// Readings kept out of `len`: `ceil(len * fraction)`, at least one.
///
/// Products that are integers on paper (`100 * 0.07`) can land just above
/// the integer in binary; those keep the integer count.
pub fn kept_count(len: usize, fraction: f64) -> usize {
    let exact = len as f64 * fraction.clamp(0.0, 1.0);
    ((exact - COUNT_EPSILON).ceil() as usize).clamp(1, len.max(1))
}

/// Mean of the smallest `ceil(n * fraction)` values.
///
/// Returns `None` for an empty slice. Non-finite values are ignored.
pub fn lower_quantile_mean(values: &[f64], fraction: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let keep = kept_count(sorted.len(), fraction);
    let kept = &sorted[..keep];
    Some(kept.iter().sum::<f64>() / keep as f64)
}

pub struct SessionAggregator;

impl SessionAggregator {
    /// Aggregate every per-tick feature the table declares.
    ///
    /// An empty history is an error, never a zero-filled result: a session in
    /// which the face was never detected has no signal to score.
    pub fn aggregate(
        history: &FeatureHistory,
        table: &CalibrationTable,
    ) -> Result<FeatureMap, ScanError> {
        if history.is_empty() {
            return Err(ScanError::InsufficientData(
                "no ticks were recorded during the session".to_string(),
            ));
        }

        let mut aggregates = FeatureMap::new();
        for feature in table.tick_features() {
            let fraction = table.get(feature).map(|c| c.fraction).unwrap_or_default();
            let values = history.values(feature);
            let value = lower_quantile_mean(&values, fraction).ok_or_else(|| {
                ScanError::InsufficientData(format!("no readings for {feature}"))
            })?;
            aggregates.insert(feature, value);
        }

        debug!(
            ticks = history.len(),
            features = aggregates.len(),
            "aggregated session history"
        );
        Ok(aggregates)
    }
}
