//! Signal extraction
//!
//! Turns one landmark frame and one audio buffer into the feature snapshot of
//! the active use case. Every declared per-tick feature is computed
//! independently: a fault in one feature (missing landmark, degenerate ratio,
//! corrupt sample) is logged, that feature reports 0 for the tick, and the
//! remaining features are unaffected.
//!
//! Transcript-derived counters live in [`speech`]; they are event-driven and
//! folded into the session separately from the tick loop.

pub mod audio;
pub mod landmarks;
pub mod speech;

pub use audio::AudioExtractor;
pub use landmarks::LandmarkExtractor;
pub use speech::{SpeechCounters, SpeechTracker};

use crate::calibration::CalibrationTable;
use crate::config::AudioConfig;
use crate::error::GeometryError;
use crate::types::{AudioBuffer, Feature, FeatureSnapshot, FeatureSource, LandmarkFrame};
use thiserror::Error;
use tracing::{debug, warn};

/// A fault confined to one feature of one tick
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureFault {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("no audio buffer for this tick")]
    NoAudio,

    #[error("audio buffer is empty")]
    EmptyAudio,

    #[error("audio sample {index} is not finite")]
    NonFiniteSample { index: usize },

    #[error("{0} is not produced per tick")]
    NotPerTick(Feature),

    #[error("computed value is not finite")]
    NonFinite,
}

/// Per-tick extractor for one use case's feature set
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    features: Vec<Feature>,
    landmarks: LandmarkExtractor,
    audio: AudioExtractor,
}

impl SignalExtractor {
    pub fn new(features: Vec<Feature>, audio: &AudioConfig) -> Self {
        Self {
            features,
            landmarks: LandmarkExtractor::default(),
            audio: AudioExtractor::new(audio),
        }
    }

    /// Extractor for the per-tick features a calibration table declares
    pub fn for_table(table: &CalibrationTable, audio: &AudioConfig) -> Self {
        Self::new(table.tick_features(), audio)
    }

    /// Features this extractor fills in on every tick
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Forget carried positions (movement reads 0 on the next tick)
    pub fn reset(&mut self) {
        self.landmarks.reset();
    }

    /// Compute the snapshot for one tick
    pub fn extract(&mut self, frame: &LandmarkFrame, audio: Option<&AudioBuffer>) -> FeatureSnapshot {
        let mut snapshot = FeatureSnapshot::new();

        for &feature in &self.features {
            let result = match feature.source() {
                FeatureSource::Landmark => self.landmarks.compute(feature, frame),
                FeatureSource::Audio => match audio {
                    Some(buffer) => self.audio.compute(feature, buffer),
                    None => Err(FeatureFault::NoAudio),
                },
                FeatureSource::Speech => Err(FeatureFault::NotPerTick(feature)),
            }
            .and_then(|v| if v.is_finite() { Ok(v) } else { Err(FeatureFault::NonFinite) });

            let value = match result {
                Ok(v) => v,
                Err(FeatureFault::NoAudio) => {
                    debug!(%feature, "no audio this tick, defaulting to 0");
                    0.0
                }
                Err(e) => {
                    warn!(%feature, error = %e, "feature fault, defaulting to 0");
                    0.0
                }
            };
            snapshot.insert(feature, value);
        }

        snapshot
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::landmarks::mesh;
    use crate::types::{LandmarkFrame, Point3, FACE_MESH_POINTS};

    /// A plausible frontal face: every mesh point gets a distinct position and
    /// the named landmarks sit where a real face would put them.
    pub fn frontal_face() -> LandmarkFrame {
        let mut points: Vec<Point3> = (0..FACE_MESH_POINTS)
            .map(|i| {
                let t = i as f64 / FACE_MESH_POINTS as f64;
                Point3::new(0.3 + 0.4 * t, 0.3 + 0.4 * (1.0 - t), 0.0)
            })
            .collect();

        let mut put = |index: usize, x: f64, y: f64| points[index] = Point3::new(x, y, 0.0);
        put(mesh::NOSE_TIP, 0.50, 0.50);
        put(mesh::FOREHEAD, 0.50, 0.20);
        put(mesh::CHIN, 0.50, 0.80);
        put(mesh::LEFT_CHEEK, 0.30, 0.50);
        put(mesh::RIGHT_CHEEK, 0.70, 0.50);
        put(mesh::LEFT_EYE_OUTER, 0.36, 0.40);
        put(mesh::LEFT_EYE_INNER, 0.44, 0.40);
        put(mesh::LEFT_EYE_UPPER, 0.40, 0.385);
        put(mesh::LEFT_EYE_LOWER, 0.40, 0.415);
        put(mesh::RIGHT_EYE_INNER, 0.56, 0.40);
        put(mesh::RIGHT_EYE_OUTER, 0.64, 0.40);
        put(mesh::RIGHT_EYE_UPPER, 0.60, 0.385);
        put(mesh::RIGHT_EYE_LOWER, 0.60, 0.415);
        put(mesh::LEFT_BROW, 0.40, 0.34);
        put(mesh::RIGHT_BROW, 0.60, 0.34);
        put(mesh::UPPER_LIP, 0.50, 0.64);
        put(mesh::LOWER_LIP, 0.50, 0.67);
        put(mesh::MOUTH_LEFT, 0.44, 0.655);
        put(mesh::MOUTH_RIGHT, 0.56, 0.655);

        LandmarkFrame::new(points)
    }

    /// The same face moved rigidly by (dx, dy)
    pub fn shifted(frame: &LandmarkFrame, dx: f64, dy: f64) -> LandmarkFrame {
        LandmarkFrame::new(
            frame
                .points()
                .iter()
                .map(|p| Point3::new(p.x + dx, p.y + dy, p.z))
                .collect(),
        )
    }
}
