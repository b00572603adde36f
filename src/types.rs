//! Core data types for the scan pipeline
//!
//! Types flowing through each stage: landmark frames and audio buffers in,
//! per-tick feature snapshots through the session, and a score result out.

use crate::calibration::ScoreMode;
use crate::error::ScanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of points produced by the face-mesh landmark model
pub const FACE_MESH_POINTS: usize = 468;

/// A single 3D landmark point (normalized image coordinates, relative depth)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Point3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Ordered landmark points for one video frame.
///
/// Indices are semantically stable across frames (index 1 is always the nose
/// tip, and so on). A frame lives for exactly one tick and is dropped after
/// extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkFrame {
    points: Vec<Point3>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Point3>) -> Self {
        Self { points }
    }

    /// Build a frame from `[x, y, z]` triples
    pub fn from_triples(triples: &[[f64; 3]]) -> Self {
        Self::new(triples.iter().copied().map(Point3::from).collect())
    }

    pub fn get(&self, index: usize) -> Option<&Point3> {
        self.points.get(index)
    }

    /// Overwrite a point in place. Returns false when the index is out of range.
    pub fn set(&mut self, index: usize, point: Point3) -> bool {
        match self.points.get_mut(index) {
            Some(slot) => {
                *slot = point;
                true
            }
            None => false,
        }
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Fixed-size window of time-domain audio samples
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// A silent buffer of the given window size
    pub fn zeroed(window_size: usize) -> Self {
        Self {
            samples: vec![0.0; window_size],
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable view for sources that copy into a preallocated window
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Where a feature's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// Computed per tick from the landmark frame
    Landmark,
    /// Computed per tick from the audio buffer
    Audio,
    /// Accumulated from transcript events over the whole session
    Speech,
}

/// Closed vocabulary of features the pipeline knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Rms,
    Zcr,
    HeadMovement,
    EyeMovement,
    LipTension,
    MouthAperture,
    EyeAspectRatio,
    BrowRaise,
    HeadTilt,
    FaceAsymmetry,
    FaceProportion,
    EyeSpacing,
    WordRate,
    FillerRate,
    RepetitionRate,
    PauseCount,
    PauseDuration,
}

impl Feature {
    pub const ALL: [Feature; 17] = [
        Feature::Rms,
        Feature::Zcr,
        Feature::HeadMovement,
        Feature::EyeMovement,
        Feature::LipTension,
        Feature::MouthAperture,
        Feature::EyeAspectRatio,
        Feature::BrowRaise,
        Feature::HeadTilt,
        Feature::FaceAsymmetry,
        Feature::FaceProportion,
        Feature::EyeSpacing,
        Feature::WordRate,
        Feature::FillerRate,
        Feature::RepetitionRate,
        Feature::PauseCount,
        Feature::PauseDuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Rms => "rms",
            Feature::Zcr => "zcr",
            Feature::HeadMovement => "headMovement",
            Feature::EyeMovement => "eyeMovement",
            Feature::LipTension => "lipTension",
            Feature::MouthAperture => "mouthAperture",
            Feature::EyeAspectRatio => "eyeAspectRatio",
            Feature::BrowRaise => "browRaise",
            Feature::HeadTilt => "headTilt",
            Feature::FaceAsymmetry => "faceAsymmetry",
            Feature::FaceProportion => "faceProportion",
            Feature::EyeSpacing => "eyeSpacing",
            Feature::WordRate => "wordRate",
            Feature::FillerRate => "fillerRate",
            Feature::RepetitionRate => "repetitionRate",
            Feature::PauseCount => "pauseCount",
            Feature::PauseDuration => "pauseDuration",
        }
    }

    pub fn source(&self) -> FeatureSource {
        match self {
            Feature::Rms | Feature::Zcr => FeatureSource::Audio,
            Feature::WordRate
            | Feature::FillerRate
            | Feature::RepetitionRate
            | Feature::PauseCount
            | Feature::PauseDuration => FeatureSource::Speech,
            _ => FeatureSource::Landmark,
        }
    }

    /// Whether the feature is produced by the sampling loop on every tick
    pub fn is_per_tick(&self) -> bool {
        self.source() != FeatureSource::Speech
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ScanError::ParseError(format!("unknown feature '{s}'")))
    }
}

/// Feature name to scalar value
pub type FeatureMap = BTreeMap<Feature, f64>;

/// The full feature-name to value mapping produced by one tick.
///
/// Every feature the active use case declares is present; faulted features
/// carry 0.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSnapshot {
    values: FeatureMap,
}

impl FeatureSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: Feature, value: f64) {
        self.values.insert(feature, value);
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.values.contains_key(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &FeatureMap {
        &self.values
    }
}

impl FromIterator<(Feature, f64)> for FeatureSnapshot {
    fn from_iter<T: IntoIterator<Item = (Feature, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Append-only sequence of raw snapshots recorded during one session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureHistory {
    snapshots: Vec<FeatureSnapshot>,
}

impl FeatureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: FeatureSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSnapshot> {
        self.snapshots.iter()
    }

    /// All recorded values of one feature, in tick order
    pub fn values(&self, feature: Feature) -> Vec<f64> {
        self.snapshots
            .iter()
            .filter_map(|s| s.get(feature))
            .collect()
    }
}

impl FromIterator<FeatureSnapshot> for FeatureHistory {
    fn from_iter<T: IntoIterator<Item = FeatureSnapshot>>(iter: T) -> Self {
        Self {
            snapshots: iter.into_iter().collect(),
        }
    }
}

/// A transcript update from the speech-to-text engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// When the engine emitted the update
    pub at: DateTime<Utc>,
    /// Newly recognized text for this update
    pub text: String,
    /// Whether the engine considers the text final (interim results are
    /// only used for timing)
    #[serde(default)]
    pub is_final: bool,
}

/// Quality flags attached to a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Fewer recorded ticks than needed for a stable aggregate
    ShortSession,
    /// The face was missing for most of the session
    LowFaceCoverage,
    /// Speech features were requested but no transcript arrived
    NoSpeech,
    /// Audio features were requested but some recorded ticks had no audio
    /// window; their audio readings are 0
    NoAudio,
}

/// Bookkeeping about the session that produced a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: f64,
    /// Ticks whose snapshot was appended to the history
    pub ticks_recorded: u32,
    /// Ticks dropped because no face was available in time
    pub ticks_skipped: u32,
    /// Recorded ticks over attempted ticks (0-1)
    pub face_coverage: f64,
    pub transcript_events: u32,
    pub quality_flags: Vec<QualityFlag>,
}

/// Final output of one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Name of the calibration table that produced the score
    pub use_case: String,
    pub mode: ScoreMode,
    /// Final score (0-100)
    pub score: f64,
    /// Score as a fraction (0-1): a probability in logistic mode, the clamped
    /// weighted value in linear mode
    pub probability: f64,
    /// Per-feature values after normalization (0-1)
    pub normalized: FeatureMap,
    /// Aggregated raw values the normalization started from
    pub raw: FeatureMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_names_round_trip_through_serde() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.as_str()));
            assert_eq!(feature.as_str().parse::<Feature>().unwrap(), feature);
        }
    }

    #[test]
    fn test_unknown_feature_name() {
        assert!("blinkRate".parse::<Feature>().is_err());
    }

    #[test]
    fn test_feature_sources() {
        assert_eq!(Feature::Rms.source(), FeatureSource::Audio);
        assert_eq!(Feature::LipTension.source(), FeatureSource::Landmark);
        assert_eq!(Feature::PauseDuration.source(), FeatureSource::Speech);
        assert!(!Feature::FillerRate.is_per_tick());
        assert!(Feature::HeadMovement.is_per_tick());
    }

    #[test]
    fn test_history_values_in_tick_order() {
        let history: FeatureHistory = [1.0, 3.0, 2.0]
            .into_iter()
            .map(|v| [(Feature::Rms, v)].into_iter().collect())
            .collect();

        assert_eq!(history.len(), 3);
        assert_eq!(history.values(Feature::Rms), vec![1.0, 3.0, 2.0]);
        assert!(history.values(Feature::Zcr).is_empty());
    }

    #[test]
    fn test_snapshot_serializes_as_flat_map() {
        let snapshot: FeatureSnapshot = [(Feature::Rms, 0.5), (Feature::HeadMovement, 0.25)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"rms":0.5,"headMovement":0.25}"#);
    }

    #[test]
    fn test_frame_set_out_of_range() {
        let mut frame = LandmarkFrame::from_triples(&[[0.0, 0.0, 0.0]]);
        assert!(frame.set(0, Point3::new(1.0, 1.0, 1.0)));
        assert!(!frame.set(5, Point3::ORIGIN));
        assert_eq!(frame.get(0), Some(&Point3::new(1.0, 1.0, 1.0)));
    }
}
