//! Error types for Synheart Scan

use thiserror::Error;

/// Errors surfaced to callers of the scan pipeline
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Insufficient data for scoring: {0}")]
    InsufficientData(String),

    #[error("No scan session is active")]
    NoActiveSession,

    #[error("A scan session is already active for this capture source")]
    SessionAlreadyActive,

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Landmark model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid calibration table: {0}")]
    InvalidCalibration(String),

    #[error("Missing aggregated feature: {0}")]
    MissingFeature(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Sampling loop is no longer running")]
    LoopClosed,
}

impl ScanError {
    /// External acquisition faults; the caller may arm a fresh session and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::DeviceUnavailable(_) | ScanError::ModelUnavailable(_)
        )
    }
}

/// Faults inside the geometry kernel. Never escape a tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("landmark index {index} out of range (frame has {len} points)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    #[error("empty index set")]
    EmptyIndexSet,

    #[error("degenerate ratio (denominator {0})")]
    DegenerateRatio(f64),
}
